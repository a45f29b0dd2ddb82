use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DISABLE_ENV: &str = "GHOSTCOACH_DISABLE";

/// Runtime bypass, consulted at every command boundary.
///
/// Active when the environment variable holds any non-empty value, or when
/// switched on programmatically through a clone of this handle.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    env_var: Option<String>,
    forced: Arc<AtomicBool>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::from_env(DISABLE_ENV)
    }
}

impl KillSwitch {
    pub fn from_env(var: &str) -> Self {
        Self {
            env_var: Some(var.to_string()),
            forced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A switch that ignores the environment.
    pub fn manual() -> Self {
        Self {
            env_var: None,
            forced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.forced.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        if self.forced.load(Ordering::SeqCst) {
            return true;
        }
        match &self.env_var {
            Some(var) => std::env::var_os(var).is_some_and(|v| !v.is_empty()),
            None => false,
        }
    }
}
