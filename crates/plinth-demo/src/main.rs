//! `plinth-demo` — minimal embedding application.
//!
//! Startup sequence:
//! 1. Load and validate [`ServerConfig`] from environment variables.
//! 2. Initialise structured JSON logging.
//! 3. Bootstrap the cross-cutting layer (listener retry, CSP, sessions,
//!    correlation).
//! 4. Register the application's own routes.
//! 5. Serve until stopped.

use anyhow::Result;
use axum::{routing::get, Extension, Router};
use plinth::{RequestContext, Server, ServerConfig};
use tracing::info;

/// `GET /` — session-aware hello, counting visits per session.
async fn hello(Extension(ctx): Extension<RequestContext>) -> String {
    let visits = ctx
        .session
        .as_ref()
        .and_then(|s| s.get("visits"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        + 1;
    if let Some(session) = &ctx.session {
        session.insert("visits", serde_json::json!(visits));
    }
    format!("hello (visit {visits}, request {})\n", ctx.request_id)
}

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = ServerConfig::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    plinth::telemetry::init(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.port,
        "plinth-demo starting"
    );

    // -----------------------------------------------------------------------
    // 3. Bootstrap
    // -----------------------------------------------------------------------
    let server = Server::new(cfg).await?;

    // -----------------------------------------------------------------------
    // 4. Application routes
    // -----------------------------------------------------------------------
    let app = Router::new().route("/", get(hello));

    // -----------------------------------------------------------------------
    // 5. Serve
    // -----------------------------------------------------------------------
    server.serve(app).await?;
    Ok(())
}
