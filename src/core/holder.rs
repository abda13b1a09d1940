//! Decide who, if anyone, the lock record names.

use crate::constants;
use crate::core::error::{LockError, Result};
use crate::util::process::{Liveness, ProcessTable};
use nix::unistd::Pid;
use std::io::Read;
use tracing::trace;

/// Verdict on the record in a lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    /// Empty, unparseable, or naming a dead process.
    Free,
    /// Names the requesting owner, which is alive.
    Ours,
    /// Names some other live process.
    Foreign(Pid),
}

/// Read the record from the start of `file` and classify it.
///
/// Must be called with the advisory lock held.
pub fn inspect<R: Read>(file: &mut R, owner: Pid, table: &dyn ProcessTable) -> Result<Holder> {
    let mut record = Vec::with_capacity(constants::RECORD_READ_LIMIT);
    file.take(constants::RECORD_READ_LIMIT as u64)
        .read_to_end(&mut record)
        .map_err(|e| LockError::kernel("read", e))?;

    let pid = match parse_pid(&record) {
        Some(pid) => pid,
        None => {
            trace!(len = record.len(), "no holder in lock record");
            return Ok(Holder::Free);
        }
    };

    let liveness = table.probe(pid).map_err(|e| LockError::kernel("kill", e))?;
    trace!(%pid, ?liveness, "probed lock holder");
    Ok(match liveness {
        Liveness::Dead => Holder::Free,
        Liveness::Alive if pid == owner => Holder::Ours,
        Liveness::Alive => Holder::Foreign(pid),
    })
}

/// Parse a leading decimal PID, skipping leading whitespace.
///
/// Anything after the digits is ignored. Zero and negative values would
/// address process groups rather than a process, so they count as no PID.
pub fn parse_pid(record: &[u8]) -> Option<Pid> {
    let text = std::str::from_utf8(record).ok()?;
    let text = text.trim_start();
    let digits_end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '+' || c == '-'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let value: i32 = text[..digits_end].parse().ok()?;
    (value > 0).then_some(Pid::from_raw(value))
}
