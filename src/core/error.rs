//! Errors raised by the lock engine and their exit statuses.

use crate::constants;
use nix::errno::Errno;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// Malformed invocation; no kernel state was touched.
    #[error("{0}")]
    Usage(String),

    /// A kernel call failed. `op` names the system call.
    #[error("{op}: {}", describe(.op, .source))]
    Kernel {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    pub fn usage(msg: impl Into<String>) -> Self {
        LockError::Usage(msg.into())
    }

    pub fn kernel(op: &'static str, source: io::Error) -> Self {
        LockError::Kernel { op, source }
    }

    /// Raw errno of a kernel failure, if the OS supplied one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            LockError::Usage(_) => None,
            LockError::Kernel { source, .. } => source.raw_os_error(),
        }
    }

    /// Process exit status for this error.
    ///
    /// Kernel failures exit with their errno; an errno that is missing or
    /// does not fit in an exit status maps to [`constants::EXIT_UNKNOWN`].
    pub fn exit_code(&self) -> u8 {
        match self {
            LockError::Usage(_) => constants::EXIT_USAGE,
            LockError::Kernel { .. } => self
                .errno()
                .and_then(|e| u8::try_from(e).ok())
                .filter(|&e| e > 0)
                .unwrap_or(constants::EXIT_UNKNOWN),
        }
    }
}

fn describe(op: &str, err: &io::Error) -> String {
    if op == "open" && err.raw_os_error() == Some(Errno::ELOOP as i32) {
        return "unsafe for lockfile to be a symlink".to_string();
    }
    err.to_string()
}

/// Result type alias for lock engine operations.
pub type Result<T> = std::result::Result<T, LockError>;
