//! Logging initialization
//!
//! Console logging via tracing-subscriber with env-filter control.
//! `RUST_LOG` wins when set; otherwise the configured level applies.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call once per process;
/// a second call reports an error rather than panicking.
pub fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
