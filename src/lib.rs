//! Interactive-shell hook for a local coaching service.
//!
//! For each command run in a session the hook captures the command line, its
//! exit status and the tail of its error output, then posts a [`Record`] to
//! `http://127.0.0.1:{port}/update`. Capture is transparent to the command and
//! every failure on the instrumentation path is absorbed; see [`Session`].

pub mod config;
pub mod delivery;
pub mod error;
pub mod executor;
pub mod i18n;
pub mod interposer;
pub mod kill_switch;
pub mod logging;
pub mod payload;
pub mod record;
pub mod relay;
pub mod session;
pub mod shell;

pub use delivery::{Deliver, DeliveryOutcome, HttpDelivery};
pub use error::HookError;
pub use interposer::{Capture, Interposer};
pub use kill_switch::KillSwitch;
pub use record::Record;
pub use session::{EndOutcome, PendingCommand, Session};
