//! Session records, the live per-request handle, and the store abstraction.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by session store backends.
///
/// The middleware logs these and keeps serving: a store failure never fails
/// the request it occurred on.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("store backend: {0}")]
    Backend(String),

    /// The record could not be converted to or from its stored shape.
    #[error("session serialisation: {0}")]
    Serialization(String),
}

/// A persisted session: identifier, expiry, and application key/value data.
///
/// The data payload is opaque to this layer; handlers read and write it
/// through [`Session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique session identifier carried by the cookie.
    pub id: String,
    /// Instant after which the record is considered expired.
    pub expires_at: SystemTime,
    /// Arbitrary application-set key/value data.
    pub data: serde_json::Map<String, Value>,
}

impl SessionRecord {
    /// Fresh record with a random identifier expiring after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            expires_at: SystemTime::now() + ttl,
            data: serde_json::Map::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= SystemTime::now()
    }
}

/// Persistence backend for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a record by id. Expired records are treated as absent.
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, SessionStoreError>;

    /// Insert or replace a record.
    async fn save(&self, record: &SessionRecord) -> Result<(), SessionStoreError>;

    /// Remove a record by id.
    async fn delete(&self, id: &str) -> Result<(), SessionStoreError>;

    /// Remove every expired record, returning how many were dropped.
    async fn sweep_expired(&self) -> Result<u64, SessionStoreError>;
}

/// Write-back snapshot taken by the middleware after the response is built.
#[derive(Debug, Clone)]
pub(crate) struct SessionSnapshot {
    pub record: SessionRecord,
    /// The record was created during this request (no cookie matched).
    pub fresh: bool,
    /// The data payload was mutated during this request.
    pub dirty: bool,
}

#[derive(Debug)]
struct SessionInner {
    record: SessionRecord,
    fresh: bool,
    dirty: bool,
}

/// Cheaply cloneable handle to the request's session.
///
/// Mutations flip an internal dirty flag; the session middleware persists the
/// record after the response only when the session is fresh or dirty.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    pub(crate) fn new(record: SessionRecord, fresh: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                record,
                fresh,
                dirty: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // The lock is only held for field access, never across .await; a
        // poisoned lock still holds usable data.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Session identifier carried by the cookie.
    pub fn id(&self) -> String {
        self.lock().record.id.clone()
    }

    /// Read a value from the session data.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().record.data.get(key).cloned()
    }

    /// Set a value, marking the session for persistence.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let mut inner = self.lock();
        inner.record.data.insert(key.into(), value);
        inner.dirty = true;
    }

    /// Remove a value, marking the session for persistence if it was present.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        let removed = inner.record.data.remove(key);
        if removed.is_some() {
            inner.dirty = true;
        }
        removed
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            record: inner.record.clone(),
            fresh: inner.fresh,
            dirty: inner.dirty,
        }
    }
}
