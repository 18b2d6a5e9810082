//! MongoDB-backed session store.
//!
//! Connection parameters are passed straight through to the driver;
//! reconnection after an outage is the driver's responsibility, this layer
//! only reports failures. Expired records are filtered out on load and
//! removed in bulk by the periodic sweep.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::{
    bson::{self, doc, DateTime},
    options::ClientOptions,
    Client, Collection,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::store::{SessionRecord, SessionStore, SessionStoreError};

/// How a [`MongoStore`] connects. All fields are handed to the driver
/// untouched.
#[derive(Debug, Clone)]
pub struct MongoStoreConfig {
    /// Driver connection string; must name a database.
    pub connection_string: String,
    /// Collection holding session documents.
    pub collection: String,
    /// Replica set name, when the store runs as a replica set.
    pub replica_set: Option<String>,
    /// Connect timeout for the initial handshake.
    pub connect_timeout: Duration,
}

/// Stored document shape. `_id` doubles as the session identifier.
#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    expires_at: DateTime,
    data: bson::Bson,
}

/// Session store backed by a MongoDB collection.
pub struct MongoStore {
    sessions: Collection<SessionDocument>,
}

impl MongoStore {
    /// Connect to the store and target the configured collection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::Backend`] if the connection string cannot
    /// be parsed, names no database, or the client cannot be constructed.
    pub async fn connect(cfg: &MongoStoreConfig) -> Result<Self, SessionStoreError> {
        let mut options = ClientOptions::parse(&cfg.connection_string)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;
        options.repl_set_name = cfg.replica_set.clone();
        options.connect_timeout = Some(cfg.connect_timeout);

        let client =
            Client::with_options(options).map_err(|e| SessionStoreError::Backend(e.to_string()))?;
        let db = client.default_database().ok_or_else(|| {
            SessionStoreError::Backend("connection string must name a database".into())
        })?;

        info!(collection = %cfg.collection, "session store connected");
        Ok(Self {
            sessions: db.collection(&cfg.collection),
        })
    }
}

impl From<mongodb::error::Error> for SessionStoreError {
    fn from(e: mongodb::error::Error) -> Self {
        SessionStoreError::Backend(e.to_string())
    }
}

fn to_document(record: &SessionRecord) -> Result<SessionDocument, SessionStoreError> {
    Ok(SessionDocument {
        id: record.id.clone(),
        expires_at: DateTime::from_system_time(record.expires_at),
        data: bson::to_bson(&record.data)
            .map_err(|e| SessionStoreError::Serialization(e.to_string()))?,
    })
}

fn to_record(doc: SessionDocument) -> Result<SessionRecord, SessionStoreError> {
    let data = bson::from_bson(doc.data)
        .map_err(|e| SessionStoreError::Serialization(e.to_string()))?;
    Ok(SessionRecord {
        id: doc.id,
        expires_at: doc.expires_at.to_system_time(),
        data,
    })
}

#[async_trait]
impl SessionStore for MongoStore {
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let filter = doc! { "_id": id, "expires_at": { "$gt": DateTime::now() } };
        match self.sessions.find_one(filter).await? {
            Some(document) => to_record(document).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        let document = to_document(record)?;
        self.sessions
            .replace_one(doc! { "_id": &record.id }, &document)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        self.sessions.delete_one(doc! { "_id": id }).await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64, SessionStoreError> {
        let result = self
            .sessions
            .delete_many(doc! { "expires_at": { "$lte": DateTime::now() } })
            .await?;
        Ok(result.deleted_count)
    }
}
