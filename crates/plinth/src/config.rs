//! Configuration loading and validation for server bootstrap.
//!
//! All values can be read from environment variables at startup via
//! [`ServerConfig::from_env`]; embedding applications may also construct the
//! struct directly. The snapshot is immutable once built.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP port to listen on. **Required.**
    pub port: u16,

    /// Context string attached to startup log entries. Defaults to `HTTP`.
    #[serde(default = "default_logger_context")]
    pub logger_context: String,

    /// Set to `false` to turn the session layer off entirely.
    #[serde(default = "default_true")]
    pub sessions_enabled: bool,

    /// Secret used to sign the session cookie. Required when sessions are on.
    #[serde(default)]
    pub session_secret: String,

    /// Name of the session cookie.
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Store collection holding session records.
    #[serde(default = "default_session_collection")]
    pub session_collection: String,

    /// Session store connection string; must name a database. Required when
    /// sessions are on.
    #[serde(default)]
    pub database_connection_string: String,

    /// Replica set name, when the store runs as a replica set.
    #[serde(default)]
    pub database_replica_set: Option<String>,

    /// Store connect timeout in seconds; passed through to the driver.
    #[serde(default = "default_store_connect_timeout")]
    pub store_connect_timeout_secs: u64,

    /// Session lifetime in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Interval between sweeps of expired session records, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub session_sweep_interval_secs: u64,

    /// Set to `false` to skip Content-Security-Policy headers entirely.
    #[serde(default = "default_true")]
    pub content_security: bool,

    /// Per-directive CSP overrides. A directive listed here fully replaces
    /// the default token list for that directive.
    #[serde(default)]
    pub content_security_policy: BTreeMap<String, Vec<String>>,

    /// View layout directory, handed untouched to the embedding
    /// application's renderer.
    #[serde(default)]
    pub layout_dir: Option<String>,

    /// View template directory, handed untouched to the embedding
    /// application's renderer.
    #[serde(default)]
    pub template_dir: Option<String>,

    /// Tracing log level used by binaries that call [`crate::telemetry::init`].
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}
fn default_logger_context() -> String {
    "HTTP".into()
}
fn default_session_name() -> String {
    "plinth.sid".into()
}
fn default_session_collection() -> String {
    "sessions".into()
}
fn default_store_connect_timeout() -> u64 {
    60
}
fn default_session_ttl() -> u64 {
    crate::session::SESSION_TTL.as_secs()
}
fn default_sweep_interval() -> u64 {
    crate::session::SWEEP_INTERVAL.as_secs()
}
fn default_log_level() -> String {
    "info".into()
}

impl ServerConfig {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: ServerConfig = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("PORT must be a non-zero listen port");
        }
        if self.session_ttl_secs == 0 {
            anyhow::bail!("SESSION_TTL_SECS must be > 0");
        }
        if self.session_sweep_interval_secs == 0 {
            anyhow::bail!("SESSION_SWEEP_INTERVAL_SECS must be > 0");
        }
        if self.sessions_enabled {
            ensure_non_empty(&self.session_secret, "SESSION_SECRET")?;
            ensure_non_empty(&self.session_name, "SESSION_NAME")?;
            ensure_non_empty(&self.session_collection, "SESSION_COLLECTION")?;
            ensure_non_empty(
                &self.database_connection_string,
                "DATABASE_CONNECTION_STRING",
            )?;
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
