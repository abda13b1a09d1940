//! The immutable description of one lock operation.

use nix::unistd::Pid;
use std::path::PathBuf;
use std::time::Duration;

/// Whether the caller acquires or releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Acquire,
    Release,
}

/// What to do while another process holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Report busy on the first failed attempt.
    NoWait,
    /// Poll every `interval`, giving up once `timeout` (if any) has elapsed.
    Poll {
        interval: Duration,
        timeout: Option<Duration>,
    },
}

impl WaitPolicy {
    pub fn is_waiting(&self) -> bool {
        matches!(self, WaitPolicy::Poll { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LockRequest {
    /// Lock file path, already resolved against the lock directory.
    pub lock_path: PathBuf,
    /// The PID whose ownership is checked.
    pub owner: Pid,
    /// PID to record instead of `owner` (borrow).
    pub replacement: Option<Pid>,
    pub mode: Mode,
    pub wait: WaitPolicy,
    /// Treat "already hold" as a failure.
    pub error_if_held: bool,
}

impl LockRequest {
    /// Acquire `lock_path` for `owner`, without waiting.
    pub fn acquire(lock_path: impl Into<PathBuf>, owner: Pid) -> Self {
        Self {
            lock_path: lock_path.into(),
            owner,
            replacement: None,
            mode: Mode::Acquire,
            wait: WaitPolicy::NoWait,
            error_if_held: false,
        }
    }

    /// Release `lock_path` held by `owner`.
    pub fn release(lock_path: impl Into<PathBuf>, owner: Pid) -> Self {
        Self {
            mode: Mode::Release,
            ..Self::acquire(lock_path, owner)
        }
    }

    pub fn with_replacement(mut self, pid: Pid) -> Self {
        self.replacement = Some(pid);
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_error_if_held(mut self, strict: bool) -> Self {
        self.error_if_held = strict;
        self
    }

    /// The PID written into the lock file.
    pub fn recorded_pid(&self) -> Pid {
        self.replacement.unwrap_or(self.owner)
    }

    /// The lock identifier as shown in messages.
    pub fn display_name(&self) -> String {
        self.lock_path.display().to_string()
    }
}
