//! Liveness probing against the local process table.

use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use std::io;

/// What a signal-0 probe says about a PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists (or exists but belongs to someone else).
    Alive,
    /// No such process.
    Dead,
}

/// Source of process liveness verdicts.
pub trait ProcessTable {
    fn probe(&self, pid: Pid) -> io::Result<Liveness>;
}

/// Probes the running kernel with `kill(pid, 0)`; no signal is delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelProcessTable;

impl ProcessTable for KernelProcessTable {
    fn probe(&self, pid: Pid) -> io::Result<Liveness> {
        liveness(signal::kill(pid, None))
    }
}

/// Verdict of a signal-0 result.
fn liveness(sent: nix::Result<()>) -> io::Result<Liveness> {
    match sent {
        Ok(()) => Ok(Liveness::Alive),
        Err(Errno::ESRCH) => Ok(Liveness::Dead),
        // We cannot confirm death of a process we may not signal.
        Err(Errno::EPERM) => Ok(Liveness::Alive),
        Err(e) => Err(io::Error::from(e)),
    }
}
