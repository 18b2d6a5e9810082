//! Bootstrap orchestrator: composes the cross-cutting middleware around the
//! embedding application's router and runs the listener.
//!
//! Setup order is fixed: logging check, session store (when enabled), then
//! the pipeline — CSP headers, session resolution, request correlation —
//! wrapped around the application's own routes, plus the `/report` sink when
//! CSP is on. Correlation and session stages sit closest to the handlers so
//! `RequestContext` is fully populated before any application code runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::post, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::correlation;
use crate::csp::{self, CspContext, CspPolicy};
use crate::error::ServerError;
use crate::listener;
use crate::session::{self, MongoStore, MongoStoreConfig, SessionManager, SessionStore};

/// Composed bootstrap state handed back to the embedding application.
pub struct Server {
    config: ServerConfig,
    sessions: Option<SessionManager>,
}

impl Server {
    /// Prepare the bootstrap layer, connecting the configured session store
    /// when sessions are enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store cannot be initialised. Port
    /// contention is not an error here — binding happens in [`Server::serve`].
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        warn_if_no_subscriber();
        info!(
            context = %config.logger_context,
            port = config.port,
            "starting http server"
        );

        let sessions = if config.sessions_enabled {
            let store = MongoStore::connect(&MongoStoreConfig {
                connection_string: config.database_connection_string.clone(),
                collection: config.session_collection.clone(),
                replica_set: config.database_replica_set.clone(),
                connect_timeout: Duration::from_secs(config.store_connect_timeout_secs),
            })
            .await?;
            Some(Self::manager(&config, Arc::new(store)))
        } else {
            None
        };

        Ok(Self { config, sessions })
    }

    /// Like [`Server::new`] but with a caller-supplied store backend, for
    /// embedding applications and tests that bring their own.
    pub fn with_store(config: ServerConfig, store: Arc<dyn SessionStore>) -> Self {
        warn_if_no_subscriber();
        let sessions = config
            .sessions_enabled
            .then(|| Self::manager(&config, store));
        Self { config, sessions }
    }

    fn manager(config: &ServerConfig, store: Arc<dyn SessionStore>) -> SessionManager {
        SessionManager::new(
            store,
            &config.session_name,
            &config.session_secret,
            Duration::from_secs(config.session_ttl_secs),
        )
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The session manager, when sessions are enabled.
    pub fn sessions(&self) -> Option<&SessionManager> {
        self.sessions.as_ref()
    }

    /// Compose the request pipeline around `app`.
    ///
    /// Per-request stage order: CSP headers, session resolution, correlation,
    /// then the routes. Axum layers wrap previously added routes, so the
    /// stages are registered in reverse.
    ///
    /// The violation-report sink at `POST /report` exists only while the CSP
    /// layer emits the policy that points at it, and sits outside the session
    /// layer: unauthenticated reports must never mint session records.
    pub fn pipeline(&self, app: Router) -> Router {
        let mut router = Router::new()
            .merge(app)
            .layer(middleware::from_fn(correlation::correlate));

        if let Some(manager) = &self.sessions {
            router = router.layer(middleware::from_fn_with_state(
                manager.clone(),
                session::middleware::attach,
            ));
        }

        if self.config.content_security {
            let report = Router::new()
                .route("/report", post(csp::report))
                .layer(middleware::from_fn(correlation::correlate));
            let ctx = CspContext::new(CspPolicy::from_overrides(
                &self.config.content_security_policy,
            ));
            router = router
                .merge(report)
                .layer(middleware::from_fn_with_state(ctx, csp::set_headers));
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Bind the configured port — retrying while it is contended — and serve
    /// `app` behind the bootstrap pipeline until the process is stopped.
    ///
    /// Also starts the periodic sweep of expired sessions.
    ///
    /// # Errors
    ///
    /// Returns an error on a non-transient bind failure or when the serve
    /// loop dies with an I/O error.
    pub async fn serve(self, app: Router) -> Result<(), ServerError> {
        if let Some(manager) = &self.sessions {
            let _sweep =
                manager.sweep_task(Duration::from_secs(self.config.session_sweep_interval_secs));
        }

        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let router = self.pipeline(app);
        let listener = listener::bind_with_retry(addr).await?;
        info!(%addr, "listening");
        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// Missing logger is a degraded mode, not a fatal condition: events emitted
/// before a subscriber exists are silently dropped, so say it once on stderr.
fn warn_if_no_subscriber() {
    if !tracing::dispatcher::has_been_set() {
        eprintln!("[plinth] no tracing subscriber installed; logs will be discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{
            header::{COOKIE, SET_COOKIE},
            Request, StatusCode,
        },
        routing::get,
        Extension,
    };
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    use crate::correlation::{RequestContext, REQUEST_ID_HEADER};
    use crate::csp::{CSP_HEADER, CSP_HEADER_LEGACY};
    use crate::session::MemoryStore;

    fn test_config(sessions: bool, csp: bool) -> ServerConfig {
        ServerConfig {
            port: 8080,
            logger_context: "HTTP".into(),
            sessions_enabled: sessions,
            session_secret: "keyboard cat".into(),
            session_name: "sid".into(),
            session_collection: "sessions".into(),
            database_connection_string: String::new(),
            database_replica_set: None,
            store_connect_timeout_secs: 60,
            session_ttl_secs: 1800,
            session_sweep_interval_secs: 600,
            content_security: csp,
            content_security_policy: BTreeMap::new(),
            layout_dir: None,
            template_dir: None,
            log_level: "info".into(),
        }
    }

    async fn whoami(Extension(ctx): Extension<RequestContext>) -> String {
        if let Some(session) = &ctx.session {
            session.insert("seen", serde_json::json!(true));
            session.id()
        } else {
            "no-session".to_owned()
        }
    }

    fn app() -> Router {
        Router::new().route("/whoami", get(whoami))
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn csp_headers_present_and_identical() {
        let server = Server::with_store(test_config(false, true), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder()
            .uri("/whoami")
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();

        let modern = resp.headers().get(CSP_HEADER).unwrap().to_str().unwrap();
        let legacy = resp
            .headers()
            .get(CSP_HEADER_LEGACY)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(modern, legacy);
        assert!(modern.contains("default-src 'self'"));
        assert!(modern.contains("https://example.com"));
    }

    #[tokio::test]
    async fn csp_disabled_emits_no_headers() {
        let server = Server::with_store(test_config(false, false), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert!(resp.headers().get(CSP_HEADER).is_none());
        assert!(resp.headers().get(CSP_HEADER_LEGACY).is_none());
    }

    #[tokio::test]
    async fn csp_override_wins_per_directive() {
        let mut config = test_config(false, true);
        config
            .content_security_policy
            .insert("script-src".into(), vec!["'none'".into()]);
        let server = Server::with_store(config, Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let header = resp.headers().get(CSP_HEADER).unwrap().to_str().unwrap();
        assert!(header.contains("script-src 'none';"));
    }

    #[tokio::test]
    async fn report_sink_accepts_valid_json() {
        let server = Server::with_store(test_config(false, true), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder()
            .method("POST")
            .uri("/report")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"foo":"bar"}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "{}");
    }

    #[tokio::test]
    async fn report_sink_survives_garbage_bodies() {
        let server = Server::with_store(test_config(false, true), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder()
            .method("POST")
            .uri("/report")
            .header("content-type", "application/csp-report")
            .body(Body::from("not json at all {{{"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "{}");
    }

    #[tokio::test]
    async fn report_route_absent_when_csp_disabled() {
        let server = Server::with_store(test_config(false, false), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder()
            .method("POST")
            .uri("/report")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn report_does_not_touch_the_session_store() {
        let store = MemoryStore::new();
        let server = Server::with_store(test_config(true, true), Arc::new(store.clone()));
        let router = server.pipeline(app());

        let req = Request::builder()
            .method("POST")
            .uri("/report")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"csp-report":{"blocked-uri":"https://evil"}}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(SET_COOKIE).is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sessions_disabled_sets_no_cookie_and_no_context_session() {
        let server = Server::with_store(test_config(false, false), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert!(resp.headers().get(SET_COOKIE).is_none());
        assert_eq!(body_string(resp).await, "no-session");
    }

    #[tokio::test]
    async fn fresh_session_sets_secure_cookie_and_persists() {
        let store = MemoryStore::new();
        let server = Server::with_store(test_config(true, false), Arc::new(store.clone()));
        let router = server.pipeline(app());

        let req = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();

        let cookie = resp
            .headers()
            .get(SET_COOKIE)
            .expect("fresh session must set a cookie")
            .to_str()
            .unwrap()
            .to_owned();
        assert!(cookie.starts_with("sid="));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("HttpOnly"));

        let sid = body_string(resp).await;
        assert!(store.load(&sid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn returning_cookie_resumes_the_same_session() {
        let store = MemoryStore::new();
        let server = Server::with_store(test_config(true, false), Arc::new(store.clone()));
        let router = server.pipeline(app());

        let first = router
            .clone()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let set_cookie = first
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        let pair = set_cookie.split(';').next().unwrap().to_owned();
        let first_sid = body_string(first).await;

        let second = router
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(COOKIE, pair)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // Resumed session: no new cookie, same id.
        assert!(second.headers().get(SET_COOKIE).is_none());
        assert_eq!(body_string(second).await, first_sid);
    }

    #[tokio::test]
    async fn request_ids_are_attached_and_distinct() {
        let server = Server::with_store(test_config(false, false), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let mut seen = Vec::new();
        for _ in 0..2 {
            let req = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
            let resp = router.clone().oneshot(req).await.unwrap();
            let id = resp
                .headers()
                .get(REQUEST_ID_HEADER)
                .expect("correlation id header must be present")
                .to_str()
                .unwrap()
                .to_owned();
            seen.push(id);
        }
        assert_ne!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn report_sink_still_works_with_sessions_enabled() {
        let server = Server::with_store(test_config(true, true), Arc::new(MemoryStore::new()));
        let router = server.pipeline(app());

        let req = Request::builder()
            .method("POST")
            .uri("/report")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"csp-report":{"blocked-uri":"https://evil"}}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        // The sink response carries the bootstrap headers like any other.
        assert!(resp.headers().get(CSP_HEADER).is_some());
        assert_eq!(body_string(resp).await, "{}");
    }
}
