//! Where the lock file lives and whether to change directory first.

use crate::constants;
use crate::core::error::{LockError, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLocation {
    /// Directory to change into before touching the lock, if any.
    pub dir: Option<PathBuf>,
    /// Lock path, relative to `dir` when that is set.
    pub file: PathBuf,
}

impl LockLocation {
    /// Resolve an identifier against an explicitly requested directory.
    ///
    /// An identifier containing `/` is used as given unless a directory was
    /// requested; otherwise it is looked up in the default lock directory.
    pub fn resolve(identifier: &str, requested_dir: Option<PathBuf>) -> Self {
        let file = PathBuf::from(identifier);
        match requested_dir {
            Some(dir) => Self {
                dir: Some(dir),
                file,
            },
            None if identifier.contains('/') => Self { dir: None, file },
            None => Self {
                dir: Some(PathBuf::from(constants::DEFAULT_LOCK_DIR)),
                file,
            },
        }
    }

    /// Change the working directory into the lock directory.
    pub fn enter(&self) -> Result<()> {
        match &self.dir {
            Some(dir) => env::set_current_dir(dir).map_err(|e| LockError::kernel("chdir", e)),
            None => Ok(()),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl std::fmt::Display for LockLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.dir {
            Some(dir) => write!(f, "{}", dir.join(&self.file).display()),
            None => write!(f, "{}", self.file.display()),
        }
    }
}
