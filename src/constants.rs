//! Centralized constants for defaults, file format and exit statuses.

use std::time::Duration;

/// Default lock directory.
pub const DEFAULT_LOCK_DIR: &str = "/var/lock";

/// Default poll interval for `--wait`, in milliseconds.
pub const DEFAULT_WAIT_MSECS: f64 = 50.0;

/// Delay between advisory-lock attempts while releasing.
pub const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Creation mode for new lock files; umask decides who can reclaim a stale lock.
pub const LOCK_FILE_MODE: u32 = 0o666;

/// Bytes read from a lock file: a PID field plus newline fits comfortably.
pub const RECORD_READ_LIMIT: usize = 16;

/// Width of the right-aligned PID field (FHS `/var/lock` convention).
pub const PID_FIELD_WIDTH: usize = 10;

// Exit status is one byte wide; shells report >= 128 for deaths by signal.

/// Lock acquired, already held (lenient mode) or released.
pub const EXIT_SUCCESS: u8 = 0;

/// Caller already holds the lock and `--error-if-held` was given.
pub const EXIT_ALREADY_HELD: u8 = 124;

/// Lock is held by another live process, or `--timeout` expired.
pub const EXIT_BUSY: u8 = 125;

/// Invalid invocation.
pub const EXIT_USAGE: u8 = 126;

/// Kernel call failed without a usable errno.
pub const EXIT_UNKNOWN: u8 = 127;

/// Environment variable naming the lock directory.
pub const ENV_LOCK_DIR: &str = "LOCKPID_DIR";

/// Environment variable naming the poll interval in milliseconds.
pub const ENV_WAIT_MSECS: &str = "LOCKPID_WAIT_MSECS";

/// Environment variable naming a TOML defaults file.
pub const ENV_CONFIG: &str = "LOCKPID_CONFIG";
