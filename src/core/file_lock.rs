//! Exclusive advisory locking using flock(2).

use crate::core::clock::Clock;
use crate::core::error::{LockError, Result};
use fs2::FileExt;
use nix::errno::Errno;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::IntoRawFd;
use std::path::Path;
use std::time::Duration;
use tracing::trace;

/// An open lock file whose advisory lock we hold.
///
/// The lock belongs to the open file description: dropping or closing this
/// value releases it, including when the process dies.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

/// Result of a non-blocking lock attempt.
#[derive(Debug)]
pub enum Attempt {
    Locked(FileLock),
    /// Another open file description holds the lock; the handle is returned.
    Busy(File),
}

impl FileLock {
    /// Try to take the advisory lock on `file` without blocking.
    pub fn try_exclusive(file: File) -> Result<Attempt> {
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Attempt::Locked(Self { file })),
            Err(ref e) if is_contended(e) => {
                trace!("advisory lock is busy");
                Ok(Attempt::Busy(file))
            }
            Err(e) => Err(LockError::kernel("flock", e)),
        }
    }

    /// Keep trying every `delay` until the lock is ours. Only contention bounds this.
    pub fn exclusive_polling(mut file: File, clock: &dyn Clock, delay: Duration) -> Result<Self> {
        loop {
            match Self::try_exclusive(file)? {
                Attempt::Locked(lock) => return Ok(lock),
                Attempt::Busy(f) => {
                    file = f;
                    clock.sleep(delay);
                }
            }
        }
    }

    /// Whether `path` still names the file we locked.
    ///
    /// A releaser unlinks the file while holding the lock, so a contender
    /// that opened it earlier may end up locking a detached inode.
    pub fn is_current(&self, path: &Path) -> Result<bool> {
        let ours = self.file.metadata().map_err(|e| LockError::kernel("fstat", e))?;
        match fs::symlink_metadata(path) {
            Ok(named) => Ok(named.dev() == ours.dev() && named.ino() == ours.ino()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LockError::kernel("lstat", e)),
        }
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Close the descriptor, reporting errors that dropping would swallow.
    pub fn close(self) -> io::Result<()> {
        nix::unistd::close(self.file.into_raw_fd()).map_err(io::Error::from)
    }
}

fn is_contended(e: &io::Error) -> bool {
    // fs2 may surface EAGAIN without mapping it to WouldBlock
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(Errno::EWOULDBLOCK as i32)
}
