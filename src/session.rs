//! Per-session command lifecycle.
//!
//! A [`Session`] owns at most one [`PendingCommand`]. `on_command_start` and
//! `on_command_end` are expected to alternate; a second start without an end
//! tears the stale capture down before anything new begins.

use crate::config::Settings;
use crate::delivery::{Deliver, DeliveryOutcome, HttpDelivery};
use crate::interposer::{Capture, Interposer};
use crate::kill_switch::KillSwitch;
use crate::payload;
use crate::record::Record;
use crate::relay::{self, TAIL_WINDOW};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

enum CaptureSource {
    Interposed(Capture),
    /// Capture file written by a relay outside this process (shell glue).
    External(PathBuf),
    None,
}

pub struct PendingCommand {
    text: String,
    capture: CaptureSource,
}

impl PendingCommand {
    /// A command whose error stream was captured by someone else into `path`.
    pub fn external(text: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            text: text.into(),
            capture: path.map_or(CaptureSource::None, CaptureSource::External),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_capturing(&self) -> bool {
        !matches!(self.capture, CaptureSource::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    /// No command was pending.
    NoPending,
    /// Kill-switch active: capture torn down, nothing built or sent.
    Disabled,
    /// Capture never started (or failed); no record for this command.
    Uncaptured,
    Reported { record: Record, delivery: DeliveryOutcome },
}

pub struct Session<D: Deliver = HttpDelivery> {
    interposer: Interposer,
    delivery: D,
    kill_switch: KillSwitch,
    pending: Option<PendingCommand>,
}

impl Session<HttpDelivery> {
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Interposer::stderr().with_drain_timeout(settings.drain_timeout),
            HttpDelivery::new(settings.port, settings.timeout),
            KillSwitch::default(),
        )
    }
}

impl<D: Deliver> Session<D> {
    pub fn new(interposer: Interposer, delivery: D, kill_switch: KillSwitch) -> Self {
        Self {
            interposer,
            delivery,
            kill_switch,
            pending: None,
        }
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Take over a command started outside this session.
    pub fn adopt(&mut self, pending: PendingCommand) {
        self.discard_stale();
        self.pending = Some(pending);
    }

    pub fn on_command_start(&mut self, text: &str) {
        self.discard_stale();
        if self.kill_switch.is_active() {
            debug!("kill-switch active, command not captured");
            return;
        }
        let capture = match self.interposer.begin_capture() {
            Ok(capture) => CaptureSource::Interposed(capture),
            Err(e) => {
                warn!(error = %e, "capture skipped for this command");
                CaptureSource::None
            }
        };
        self.pending = Some(PendingCommand {
            text: text.to_string(),
            capture,
        });
    }

    /// Complete the pending command. `exit_code` must be the status read
    /// before anything else ran after the command.
    pub fn on_command_end(&mut self, exit_code: i32) -> EndOutcome {
        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.on_command_end_in(exit_code, &cwd)
    }

    pub fn on_command_end_in(&mut self, exit_code: i32, cwd: &str) -> EndOutcome {
        let Some(pending) = self.pending.take() else {
            return EndOutcome::NoPending;
        };
        if self.kill_switch.is_active() {
            teardown(pending.capture, None);
            debug!("kill-switch active, record skipped");
            return EndOutcome::Disabled;
        }
        let Some(captured) = teardown(pending.capture, Some(self.interposer.drain_timeout())) else {
            return EndOutcome::Uncaptured;
        };
        let record = payload::build(&pending.text, exit_code, &captured, cwd);
        let delivery = self.delivery.send(&record);
        EndOutcome::Reported { record, delivery }
    }

    fn discard_stale(&mut self) {
        if let Some(stale) = self.pending.take() {
            warn!(command = %stale.text, "previous command never completed, discarding its capture");
            teardown(stale.capture, None);
        }
    }
}

/// Release a capture. With `read_back` set the captured tail is returned,
/// waiting at most that long for an external relay to seal the file.
/// Teardown always happens; read failures only cost the record.
fn teardown(capture: CaptureSource, read_back: Option<Duration>) -> Option<Vec<u8>> {
    match capture {
        CaptureSource::Interposed(capture) if read_back.is_some() => match capture.finish() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                if !e.is_teardown() {
                    warn!(error = %e, "capture lost");
                }
                None
            }
        },
        CaptureSource::Interposed(capture) => {
            // Restore failures are already reported on the terminal.
            let _ = capture.discard();
            None
        }
        CaptureSource::External(path) => {
            let captured = if let Some(wait) = read_back {
                relay::wait_for_seal(&path, wait);
                relay::read_tail(&path, TAIL_WINDOW)
                    .map_err(|e| warn!(path = %path.display(), error = %e, "capture unreadable"))
                    .ok()
            } else {
                None
            };
            match std::fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    warn!(path = %path.display(), error = %e, "could not remove capture file");
                }
                _ => {}
            }
            captured
        }
        CaptureSource::None => None,
    }
}
