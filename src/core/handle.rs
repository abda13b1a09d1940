//! Defensive opening of the lock file.

use crate::constants;
use crate::core::error::{LockError, Result};
use crate::util::privilege;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, warn};

/// Open `path` read-write, creating it when `create` is set.
///
/// A symlink at `path` is never followed: the open fails with `ELOOP`.
/// When running as root, a permission failure on an existing regular file
/// is retried once after taking ownership of it.
pub fn open_lock_file(path: &Path, create: bool) -> Result<File> {
    open_with(path, create, may_retake, open_nofollow, privilege::take_ownership)
}

/// The retake sequence with its kernel calls supplied by the caller.
fn open_with(
    path: &Path,
    create: bool,
    may_retake: impl FnOnce(&Path) -> bool,
    mut open: impl FnMut(&Path, bool) -> io::Result<File>,
    retake: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<File> {
    match open(path, create) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied && may_retake(path) => {
            warn!(path = %path.display(), "permission denied as root; taking ownership and retrying");
            retake(path).map_err(|e| LockError::kernel("chown", e))?;
            open(path, create).map_err(|e| LockError::kernel("open", e))
        }
        Err(e) => Err(LockError::kernel("open", e)),
    }
}

fn open_nofollow(path: &Path, create: bool) -> io::Result<File> {
    debug!(path = %path.display(), create, "opening lock file");
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .truncate(false)
        .mode(constants::LOCK_FILE_MODE)
        .custom_flags(nix::libc::O_NOFOLLOW)
        .open(path)
}

fn may_retake(path: &Path) -> bool {
    privilege::is_root()
        && fs::symlink_metadata(path)
            .map(|m| m.file_type().is_file())
            .unwrap_or(false)
}
