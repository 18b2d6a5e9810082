//! In-process session store.
//!
//! Non-persistent: records vanish with the process. Used by tests and by
//! embedding applications that bring their own backend later.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{SessionRecord, SessionStore, SessionStoreError};

/// Session store backed by a process-local map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let map = self.inner.read().await;
        Ok(map.get(id).filter(|r| !r.is_expired()).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        let mut map = self.inner.write().await;
        map.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        let mut map = self.inner.write().await;
        map.remove(id);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64, SessionStoreError> {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, record| !record.is_expired());
        Ok((before - map.len()) as u64)
    }
}
