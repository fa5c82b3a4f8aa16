//! Durable snapshot of the chat store
//!
//! The whole keyed container is stored as one JSON document under the key
//! [`SNAPSHOT_KEY`] in an embedded `sled` database.

use crate::error::PersonaChatError;
use crate::persona::PersonaId;
use crate::store::types::{Chat, ChatId};
use crate::usage::UsageRecord;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::collections::BTreeMap;
use std::path::Path;

/// Key the snapshot document is stored under
pub const SNAPSHOT_KEY: &str = "chat-store";

/// Owned snapshot, as loaded from disk
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Chats per persona, most-recent-first
    #[serde(default)]
    pub chats: BTreeMap<PersonaId, Vec<Chat>>,
    /// Usage record per chat
    #[serde(default)]
    pub token_usage: BTreeMap<ChatId, UsageRecord>,
    /// Highest chat id ever issued
    #[serde(default)]
    pub last_chat_id: u64,
}

/// Borrowed snapshot, serialized without cloning the state
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotRef<'a> {
    pub chats: BTreeMap<&'a PersonaId, Vec<&'a Chat>>,
    pub token_usage: BTreeMap<ChatId, &'a UsageRecord>,
    pub last_chat_id: u64,
}

/// Snapshot persistence backed by `sled`
pub struct SnapshotStore {
    db: Db,
}

impl SnapshotStore {
    /// Open or create the snapshot database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the database directory
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::Storage` if the database cannot be opened
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersonaChatError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| PersonaChatError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// Load the snapshot
    ///
    /// A missing snapshot, or one that fails to read or parse, yields an
    /// empty snapshot; the failure is logged.
    pub fn load(&self) -> Snapshot {
        let bytes = match self.db.get(SNAPSHOT_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("No snapshot found, starting with an empty store");
                return Snapshot::default();
            }
            Err(e) => {
                tracing::warn!("Failed to read snapshot, starting empty: {}", e);
                return Snapshot::default();
            }
        };

        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Corrupt snapshot ignored, starting empty: {}", e);
                Snapshot::default()
            }
        }
    }

    /// Serialize and write the snapshot, then flush it to disk
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::Storage` if serialization, insertion or
    /// flushing fails
    pub(crate) fn save(&self, snapshot: &SnapshotRef<'_>) -> Result<(), PersonaChatError> {
        self.write(&Self::encode(snapshot)?)
    }

    /// Serialize a snapshot to the stored JSON document
    pub(crate) fn encode(snapshot: &SnapshotRef<'_>) -> Result<Vec<u8>, PersonaChatError> {
        serde_json::to_vec(snapshot)
            .map_err(|e| PersonaChatError::Storage(format!("Serialization failed: {}", e)))
    }

    /// Write an encoded snapshot and flush it to disk
    pub(crate) fn write(&self, bytes: &[u8]) -> Result<(), PersonaChatError> {
        self.db
            .insert(SNAPSHOT_KEY, bytes)
            .map_err(|e| PersonaChatError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| PersonaChatError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}
