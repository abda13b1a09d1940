//! Optional TOML defaults file.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Directory holding lock files.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,

    /// Poll interval for waiting, in milliseconds.
    #[serde(default)]
    pub wait_msecs: Option<f64>,

    /// Give up waiting after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    #[serde(default)]
    pub quiet: bool,

    /// Exit with the "already holding" status instead of success.
    #[serde(default)]
    pub error_if_held: bool,
}
