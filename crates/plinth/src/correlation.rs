//! Per-request correlation: unique request IDs and request-scoped logging.
//!
//! Runs after the session middleware and before any application handler, so
//! every log entry emitted while the request is in flight carries the
//! correlation ID and handlers can read the whole [`RequestContext`].

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::session::Session;

/// Response header echoing the correlation ID back to the caller.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifier assigned to each inbound request.
///
/// Random v4 UUIDs: unique with overwhelming probability among concurrently
/// in-flight requests, which is all correlation needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request state threaded through the pipeline.
///
/// Constructed once per request by [`correlate`], read by handlers via
/// `Extension<RequestContext>`, and dropped when the response completes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation ID for this request.
    pub request_id: RequestId,
    /// Handle to the resolved session, when sessions are enabled.
    pub session: Option<Session>,
}

/// Middleware: assign a request ID, derive a request-scoped log span, and
/// record the method and path before the request reaches any handler.
pub async fn correlate(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::generate();
    let span = info_span!("request", request_id = %request_id);

    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    // The session middleware runs earlier in the pipeline; pick up its handle
    // so handlers get everything through one extension.
    let session = req.extensions().get::<Session>().cloned();
    req.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        session,
    });

    async move {
        info!(method = %method, path = %path, "request");
        let mut resp = next.run(req).await;
        resp.extensions_mut().insert(request_id.clone());
        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            resp.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        resp
    }
    .instrument(span)
    .await
}
