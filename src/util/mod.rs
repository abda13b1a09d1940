//! Utility modules for process probing, privileges and logging.

pub mod logging;
pub mod privilege;
pub mod process;
