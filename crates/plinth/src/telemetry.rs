//! Telemetry initialisation for embedding binaries.
//!
//! The bootstrap layer itself only emits `tracing` events; installing a
//! subscriber is the embedding application's call. This helper sets up the
//! standard one: structured JSON logs on stdout, level from `RUST_LOG` when
//! set, otherwise the configured default.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber has already been set.
pub fn init(log_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing subscriber: {e}"))
}
