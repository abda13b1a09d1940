//! Privilege checks and the root-only ownership retake.

use nix::unistd::{getegid, geteuid};
use std::io;
use std::os::unix::fs as unix_fs;
use std::path::Path;

/// Check if the current process is running as root (euid 0).
pub fn is_root() -> bool {
    geteuid().is_root()
}

/// Make the effective user and group own `path`, without following a symlink.
pub fn take_ownership(path: &Path) -> io::Result<()> {
    unix_fs::lchown(
        path,
        Some(geteuid().as_raw()),
        Some(getegid().as_raw()),
    )
}
