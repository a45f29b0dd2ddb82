use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("cannot create capture storage: {0}")]
    TempStorage(#[source] io::Error),

    #[error("cannot duplicate descriptor {fd}: {source}")]
    Duplicate {
        fd: i32,
        #[source]
        source: io::Error,
    },

    #[error("cannot rewire descriptor {fd}: {source}")]
    Rewire {
        fd: i32,
        #[source]
        source: io::Error,
    },

    #[error("cannot restore descriptor {fd}: {source}")]
    Restore {
        fd: i32,
        #[source]
        source: io::Error,
    },

    #[error("cannot read capture {}: {source}", path.display())]
    ReadBack {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HookError {
    /// Restore failures leave the session's error stream broken for every later
    /// command; everything else only loses one record.
    pub fn is_teardown(&self) -> bool {
        matches!(self, HookError::Restore { .. })
    }
}

pub type Result<T> = std::result::Result<T, HookError>;
