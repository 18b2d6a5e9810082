//! Session lifecycle: store ownership, TTL, periodic sweep, and middleware.
//!
//! # Lifecycle
//!
//! 1. At bootstrap the orchestrator connects the configured [`MongoStore`]
//!    (or accepts any caller-supplied [`SessionStore`]).
//! 2. Each request's middleware resolves a [`SessionRecord`] from the signed
//!    session cookie, creating one when the cookie is absent, unknown,
//!    expired, or the store cannot be reached.
//! 3. Mutations made by handlers through the [`Session`] handle are written
//!    back once the response is produced.
//! 4. A background task sweeps expired records on a fixed interval,
//!    independent of request traffic.
//!
//! Store errors are logged at error level and never crash the process; the
//! store client's own reconnect policy is expected to restore service.
//!
//! When sessions are disabled in configuration none of this is installed: no
//! store connection, no cookie handling, no session on the request context.

pub mod cookie;
pub mod memory;
pub mod middleware;
pub mod mongo;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::{MongoStore, MongoStoreConfig};
pub use store::{Session, SessionRecord, SessionStore, SessionStoreError};

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, error, info};

/// Default session lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Default interval between sweeps of expired records.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Owns the session store plus the settings the middleware needs.
///
/// Cheap to clone; all fields are `Arc`-backed.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie_name: Arc<str>,
    secret: Arc<str>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cookie_name: &str,
        secret: &str,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cookie_name: cookie_name.into(),
            secret: secret.into(),
            ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load the record for `sid`, or mint a fresh one when the id is absent,
    /// unknown, expired, or the store cannot be reached.
    pub async fn resolve(&self, sid: Option<&str>) -> Session {
        if let Some(sid) = sid {
            match self.store.load(sid).await {
                Ok(Some(record)) => return Session::new(record, false),
                Ok(None) => debug!(session_id = %sid, "session not found or expired"),
                Err(e) => error!(error = %e, "session store load failed"),
            }
        }
        Session::new(SessionRecord::new(self.ttl), true)
    }

    /// Spawn the periodic sweep of expired records.
    ///
    /// The first sweep fires after one full interval. A failed sweep is
    /// logged and the next tick proceeds normally.
    pub fn sweep_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // First tick fires immediately — skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.sweep_expired().await {
                    Ok(0) => debug!("session sweep: nothing expired"),
                    Ok(removed) => info!(removed, "session sweep removed expired records"),
                    Err(e) => error!(error = %e, "session sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(store: MemoryStore) -> SessionManager {
        SessionManager::new(
            Arc::new(store),
            "sid",
            "keyboard cat",
            Duration::from_secs(1800),
        )
    }

    #[tokio::test]
    async fn resolve_without_cookie_creates_fresh_session() {
        let mgr = manager(MemoryStore::new());
        let session = mgr.resolve(None).await;
        assert!(session.snapshot().fresh);
    }

    #[tokio::test]
    async fn resolve_unknown_id_creates_fresh_session() {
        let mgr = manager(MemoryStore::new());
        let session = mgr.resolve(Some("ghost")).await;
        assert!(session.snapshot().fresh);
        assert_ne!(session.id(), "ghost");
    }

    #[tokio::test]
    async fn resolve_known_id_returns_stored_record() {
        let store = MemoryStore::new();
        let record = SessionRecord::new(Duration::from_secs(1800));
        store.save(&record).await.unwrap();

        let mgr = manager(store);
        let session = mgr.resolve(Some(&record.id)).await;
        assert!(!session.snapshot().fresh);
        assert_eq!(session.id(), record.id);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_removes_expired_records() {
        let store = MemoryStore::new();
        store
            .save(&SessionRecord::new(Duration::ZERO))
            .await
            .unwrap();
        let live = SessionRecord::new(Duration::from_secs(3600));
        store.save(&live).await.unwrap();

        let mgr = manager(store.clone());
        let task = mgr.sweep_task(Duration::from_secs(600));

        // Paused time: advance past one full interval so the sweep fires.
        time::sleep(Duration::from_secs(601)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(store.len().await, 1);
        assert!(store.load(&live.id).await.unwrap().is_some());
        task.abort();
    }
}
