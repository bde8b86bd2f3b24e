//! Structured logging setup.

use crate::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// With `filter = None` the `RUST_LOG` environment variable is honored,
/// falling back to `info`. Call at most once per process; library code
/// only emits events and never installs a subscriber on its own.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(filter: Option<&str>) -> Result<()> {
    let env_filter = filter.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        EnvFilter::new,
    );

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| Error::OperationFailed {
            operation: "init_tracing".to_string(),
            cause: e.to_string(),
        })
}
