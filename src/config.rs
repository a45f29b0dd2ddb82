use crate::delivery::{DEFAULT_PORT, DEFAULT_TIMEOUT};
use crate::interposer::DEFAULT_DRAIN_TIMEOUT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const PORT_ENV: &str = "GHOSTCOACH_PORT";
pub const TIMEOUT_ENV: &str = "GHOSTCOACH_TIMEOUT_MS";
pub const DRAIN_TIMEOUT_ENV: &str = "GHOSTCOACH_DRAIN_TIMEOUT_MS";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub delivery: DeliveryConfig,
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub port: u16,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    // How long to wait for the relay to drain once the command is done
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    // "auto", "en" or "ru"
    pub language: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
        }
    }
}

/// Effective values for one session, after the file and environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub timeout: Duration,
    pub drain_timeout: Duration,
    pub language: String,
}

impl Config {
    /// Load the config file. A hook must not break the shell, so a missing or
    /// broken file falls back to defaults.
    pub fn load() -> Self {
        let config_path = Self::get_config_path();
        if !config_path.exists() {
            return Config::default();
        }
        match Self::read_from(&config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %config_path.display(), error = %e, "ignoring unreadable config");
                Config::default()
            }
        }
    }

    fn read_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::get_config_path();
        if let Some(config_dir) = config_path.parent() {
            fs::create_dir_all(config_dir)
                .with_context(|| format!("creating {}", config_dir.display()))?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)
            .with_context(|| format!("writing {}", config_path.display()))?;
        Ok(config_path)
    }

    pub fn get_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ghostcoach")
            .join("config.toml")
    }

    /// Apply environment overrides. Invalid values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(port) = env_number::<u16>(PORT_ENV) {
            self.delivery.port = port;
        }
        if let Some(timeout_ms) = env_number::<u64>(TIMEOUT_ENV) {
            self.delivery.timeout_ms = timeout_ms;
        }
        if let Some(drain_timeout_ms) = env_number::<u64>(DRAIN_TIMEOUT_ENV) {
            self.capture.drain_timeout_ms = drain_timeout_ms;
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            port: self.delivery.port,
            timeout: Duration::from_millis(self.delivery.timeout_ms),
            drain_timeout: Duration::from_millis(self.capture.drain_timeout_ms),
            language: self.get_effective_language(),
        }
    }

    pub fn get_effective_language(&self) -> String {
        if self.display.language == "auto" {
            std::env::var("LANG")
                .unwrap_or_else(|_| "en_US".to_string())
                .split('.')
                .next()
                .unwrap_or("en")
                .to_string()
        } else {
            self.display.language.clone()
        }
    }
}

fn env_number<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var, value = raw, "ignoring invalid value");
            None
        }
    }
}
