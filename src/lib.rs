//! Race-free PID-file locking for shell scripts.
//!
//! A lock file holds the decimal PID of its owner. Contenders serialize on
//! an `flock(2)` advisory lock before reading or rewriting that PID, and a
//! record naming a dead process is reclaimed.
//!
//! ## Modules
//! - `cli` — Command-line parsing and reporting
//! - `core` — Lock engine (open, flock, inspect, write, wait)
//! - `models` — Request and config-file structures
//! - `util` — Process probing, privileges, logging

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod util;
