//! The lock engine and the kernel-facing steps it is built from.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod file_lock;
pub mod handle;
pub mod holder;
pub mod paths;
pub mod writer;

pub use engine::{LockEngine, Outcome};
pub use error::LockError;
