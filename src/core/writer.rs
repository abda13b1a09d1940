//! Committing the winning PID to the lock file.

use crate::constants;
use crate::core::error::{LockError, Result};
use crate::core::file_lock::FileLock;
use nix::unistd::Pid;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;

/// A seekable, truncatable lock record.
pub trait RecordFile: Write + Seek {
    fn truncate(&mut self) -> io::Result<()>;
}

impl RecordFile for File {
    fn truncate(&mut self) -> io::Result<()> {
        self.set_len(0)
    }
}

/// The on-disk form of a PID: right-aligned in a fixed field, then newline.
pub fn format_record(pid: Pid) -> String {
    format!("{:>width$}\n", pid.as_raw(), width = constants::PID_FIELD_WIDTH)
}

/// Replace the record with `pid`. Must be called with the advisory lock held.
///
/// A failed write leaves the file empty, never holding a partial PID.
pub fn write_record<F: RecordFile>(file: &mut F, pid: Pid) -> Result<()> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| LockError::kernel("lseek", e))?;
    file.truncate()
        .map_err(|e| LockError::kernel("ftruncate", e))?;

    let line = format_record(pid);
    if let Err(e) = file.write_all(line.as_bytes()) {
        if let Err(te) = file.truncate() {
            warn!(error = %te, "could not clear partial lock record");
        }
        return Err(LockError::kernel("write", e));
    }
    Ok(())
}

/// Write `pid` and close the handle, which drops the advisory lock.
///
/// If closing fails the content can't be trusted, so the file is removed.
pub fn commit(lock: FileLock, path: &Path, pid: Pid) -> Result<()> {
    commit_with(lock, path, pid, FileLock::close)
}

fn commit_with(
    mut lock: FileLock,
    path: &Path,
    pid: Pid,
    close: impl FnOnce(FileLock) -> io::Result<()>,
) -> Result<()> {
    write_record(lock.file(), pid)?;
    close(lock).map_err(|e| {
        warn!(path = %path.display(), error = %e, "close failed; removing lock file");
        let _ = fs::remove_file(path);
        LockError::kernel("close", e)
    })
}
