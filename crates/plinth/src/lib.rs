//! HTTP server bootstrap with resilient port binding, per-request
//! Content-Security-Policy headers, persistent sessions, and request
//! correlation.
//!
//! The embedding application supplies routing, rendering, and business logic;
//! this crate owns the cross-cutting pieces around them:
//!
//! - [`listener`]: listening-socket acquisition with jittered retry while the
//!   port is still held by a previous process instance.
//! - [`csp`]: per-request Content-Security-Policy generation (host-dependent)
//!   and the violation-report sink at `POST /report`.
//! - [`session`]: persistent session records with TTL, a periodic sweep of
//!   expired records, and the middleware that resolves and writes them back.
//! - [`correlation`]: unique per-request IDs, request-scoped log spans, and
//!   one log line per inbound request.
//! - [`server`]: composes the above, in a fixed order, around the
//!   application's own [`axum::Router`].

pub mod config;
pub mod correlation;
pub mod csp;
pub mod error;
pub mod listener;
pub mod server;
pub mod session;
pub mod telemetry;

pub use config::ServerConfig;
pub use correlation::{RequestContext, RequestId};
pub use csp::CspPolicy;
pub use error::ServerError;
pub use server::Server;
pub use session::{Session, SessionManager, SessionStore};
