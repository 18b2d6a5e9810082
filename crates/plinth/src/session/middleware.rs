//! Session resolution middleware: cookie in, record out, write-back on exit.

use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::Response,
};
use tracing::error;

use super::{cookie, SessionManager};

/// Middleware: resolve (or create) the session named by the request cookie,
/// expose the handle to downstream stages, and persist changes after the
/// response is produced.
///
/// Store failures never fail the request: the handler simply runs against a
/// fresh record, and a failed write-back is logged and accepted as
/// eventual-consistency behaviour.
pub async fn attach(
    State(manager): State<SessionManager>,
    mut req: Request,
    next: Next,
) -> Response {
    let sid = cookie::session_id_from(req.headers(), manager.cookie_name(), manager.secret());
    let session = manager.resolve(sid.as_deref()).await;
    req.extensions_mut().insert(session.clone());

    let mut resp = next.run(req).await;

    let snapshot = session.snapshot();
    if snapshot.fresh {
        if let Some(value) = cookie::set_cookie_value(
            manager.cookie_name(),
            manager.secret(),
            &snapshot.record.id,
        ) {
            resp.headers_mut().append(SET_COOKIE, value);
        }
    }
    if snapshot.fresh || snapshot.dirty {
        if let Err(e) = manager.store().save(&snapshot.record).await {
            error!(error = %e, session_id = %snapshot.record.id, "failed to persist session");
        }
    }
    resp
}
