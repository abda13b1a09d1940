//! Diagnostic tracing setup.
//!
//! Status lines meant for calling scripts are printed directly; tracing only
//! carries internal diagnostics to stderr, filtered by `RUST_LOG`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber. `verbose` lowers the default level to debug.
pub fn init(verbose: bool) -> Result<()> {
    let default = if verbose { "lockpid=debug" } else { "lockpid=warn" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init()
        .map_err(|e| anyhow::anyhow!("initialize tracing subscriber: {e}"))
}
