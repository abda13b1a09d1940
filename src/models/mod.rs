//! Data structures handed to the lock engine.

pub mod config;
pub mod request;
