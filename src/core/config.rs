//! Loading the optional TOML defaults file.

use crate::core::error::{LockError, Result};
use crate::models::config::ConfigFile;
use std::fs;
use std::io;
use std::path::Path;

/// Load defaults from `path`. A missing file yields the built-in defaults.
pub fn load(path: &Path) -> Result<ConfigFile> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(e) => {
            return Err(LockError::usage(format!(
                "read config {}: {}",
                path.display(),
                e
            )))
        }
    };
    toml::from_str(&content)
        .map_err(|e| LockError::usage(format!("parse config {}: {}", path.display(), e)))
}
