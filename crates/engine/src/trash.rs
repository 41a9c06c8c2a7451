//! Trash lifecycle: soft delete, restore and purge.
//!
//! A record moves LIVE -> TRASHED on soft delete and back on restore. Trash
//! entries are keyed by the original record id, so there is at most one trash
//! copy per record. Every transition is a single atomic store commit.

use crate::error::{EngineError, EngineResult};
use bulwark_core::config::TrashConfig;
use bulwark_core::{Document, Record, RecordKind, TRASH_COLLECTION};
use bulwark_storage::{DocumentStore, Filter, WriteBatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Keys a trash entry owns. A live record carrying any of them cannot be
/// trashed without losing either the field or the metadata.
/// `restorationCount` is absent: it is carried across delete cycles.
pub const TRASH_METADATA_KEYS: [&str; 7] = [
    "originalCollection",
    "originalId",
    "deletedBy",
    "deletedAt",
    "expiresAt",
    "size",
    "type",
];

/// A soft-deleted record plus its trash metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
    /// Serialized byte length of the original record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    /// Times this record has been restored. Carried across delete cycles.
    #[serde(default)]
    pub restoration_count: u64,
    /// The record's own fields.
    #[serde(flatten)]
    pub fields: Document,
}

impl TrashEntry {
    pub fn to_document(&self) -> EngineResult<Document> {
        match serde_json::to_value(self).map_err(bulwark_core::Error::from)? {
            Value::Object(map) => Ok(map),
            _ => Err(bulwark_core::Error::Serialization(
                "trash entry did not serialize to an object".to_string(),
            )
            .into()),
        }
    }

    pub fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document))
    }

    /// Whether the entry is due for purge at `now`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Result of a restore request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The record is live again.
    Restored {
        collection: String,
        id: String,
        restoration_count: u64,
    },
    /// A live record with this id already existed; the stale trash entry was
    /// purged.
    AlreadyRestored { collection: String, id: String },
    /// No trash entry: already restored or purged.
    Missing,
}

/// Manages the `trash` collection.
pub struct TrashManager {
    store: Arc<dyn DocumentStore>,
    config: TrashConfig,
}

impl TrashManager {
    pub fn new(store: Arc<dyn DocumentStore>, config: TrashConfig) -> Self {
        Self { store, config }
    }

    /// Move a live record into the trash.
    ///
    /// Fails with `AlreadyTrashed` if a trash entry with the same id exists,
    /// and `NotFound` if there is no live record. A record that would not
    /// survive [`restore`](Self::restore) is refused and stays live.
    pub async fn soft_delete(
        &self,
        collection: &str,
        id: &str,
        deleted_by: &str,
    ) -> EngineResult<TrashEntry> {
        if collection.trim().is_empty() || id.trim().is_empty() {
            return Err(EngineError::MissingMetadata(
                "collection and id are required".to_string(),
            ));
        }
        let kind = RecordKind::from_collection(collection)
            .map_err(|e| EngineError::MissingMetadata(e.to_string()))?;

        if self.store.exists(TRASH_COLLECTION, id).await? {
            return Err(EngineError::AlreadyTrashed(id.to_string()));
        }
        let mut fields = self
            .store
            .get(collection, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("{collection}/{id}")))?;

        if let Some(key) = TRASH_METADATA_KEYS.iter().find(|k| fields.contains_key(**k)) {
            return Err(EngineError::MissingMetadata(format!(
                "{collection}/{id} has field {key:?}, which is reserved for trash metadata"
            )));
        }
        Record::from_document(kind, fields.clone())?;

        let size = serde_json::to_vec(&fields)
            .map_err(bulwark_core::Error::from)?
            .len() as u64;
        let restoration_count = fields
            .remove("restorationCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let deleted_at = OffsetDateTime::now_utc();

        let entry = TrashEntry {
            original_collection: Some(collection.to_string()),
            original_id: Some(id.to_string()),
            deleted_by: Some(deleted_by.to_string()),
            deleted_at: Some(deleted_at),
            expires_at: Some(deleted_at + self.config.retention()),
            size: Some(size),
            record_type: Some(kind.as_str().to_string()),
            restoration_count,
            fields,
        };

        let mut batch = WriteBatch::new();
        batch
            .set(TRASH_COLLECTION, id, entry.to_document()?)
            .delete(collection, id);
        self.store.commit(batch).await?;

        tracing::debug!(collection, id, deleted_by, "Moved record to trash");
        Ok(entry)
    }

    /// Move a trash entry back to its original collection.
    pub async fn restore(&self, trash_id: &str, restored_by: &str) -> EngineResult<RestoreOutcome> {
        if trash_id.trim().is_empty() {
            return Err(EngineError::MissingMetadata("trash id is required".to_string()));
        }
        let Some(document) = self.store.get(TRASH_COLLECTION, trash_id).await? else {
            tracing::info!(trash_id, "Trash entry already restored or purged");
            return Ok(RestoreOutcome::Missing);
        };

        let incomplete = |missing: String| EngineError::IncompleteMetadata {
            trash_id: trash_id.to_string(),
            missing,
        };
        let entry = TrashEntry::from_document(document).map_err(|e| incomplete(e.to_string()))?;

        let collection = entry
            .original_collection
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| incomplete("originalCollection".to_string()))?;
        let kind = RecordKind::from_collection(&collection)
            .map_err(|_| incomplete(format!("known originalCollection (got {collection:?})")))?;
        let record_type = entry
            .record_type
            .as_deref()
            .ok_or_else(|| incomplete("type".to_string()))?;
        if record_type != kind.as_str() {
            return Err(incomplete(format!(
                "type {record_type:?} matching collection {collection:?}"
            )));
        }

        let id = trash_id.to_string();
        if self.store.exists(&collection, &id).await? {
            self.store.delete(TRASH_COLLECTION, trash_id).await?;
            tracing::info!(
                collection = %collection,
                trash_id,
                "Live record already exists, purged stale trash entry"
            );
            return Ok(RestoreOutcome::AlreadyRestored { collection, id });
        }

        let restoration_count = entry.restoration_count + 1;
        let restored_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| bulwark_core::Error::Serialization(e.to_string()))?;
        let mut record = entry.fields;
        record.insert("restoredAt".to_string(), Value::String(restored_at));
        record.insert("restoredBy".to_string(), Value::String(restored_by.to_string()));
        record.insert("restorationCount".to_string(), Value::from(restoration_count));

        // The restored document must still be a valid record of its kind.
        Record::from_document(kind, record.clone())?;

        let mut batch = WriteBatch::new();
        batch
            .set(&collection, &id, record)
            .delete(TRASH_COLLECTION, trash_id);
        self.store.commit(batch).await?;

        tracing::debug!(collection = %collection, id = %id, restored_by, "Restored record from trash");
        Ok(RestoreOutcome::Restored {
            collection,
            id,
            restoration_count,
        })
    }

    /// All trash entries, ordered by id. Unreadable entries are skipped.
    pub async fn list_trash(&self) -> EngineResult<Vec<(String, TrashEntry)>> {
        let documents = self.store.query(TRASH_COLLECTION, &Filter::all()).await?;
        let mut entries = Vec::with_capacity(documents.len());
        for (id, document) in documents {
            match TrashEntry::from_document(document) {
                Ok(entry) => entries.push((id, entry)),
                Err(e) => {
                    tracing::warn!(trash_id = %id, error = %e, "Skipping unreadable trash entry");
                }
            }
        }
        Ok(entries)
    }

    /// Permanently delete every trash entry in one commit.
    pub async fn empty_trash(&self) -> EngineResult<u64> {
        self.purge(Filter::all(), "empty").await
    }

    /// Permanently delete entries whose `expiresAt` is at or before `now`.
    pub async fn sweep_expired(&self, now: OffsetDateTime) -> EngineResult<u64> {
        self.purge(Filter::all().at_or_before("expiresAt", now), "sweep")
            .await
    }

    async fn purge(&self, filter: Filter, reason: &str) -> EngineResult<u64> {
        let doomed = self.store.query(TRASH_COLLECTION, &filter).await?;
        if doomed.is_empty() {
            tracing::debug!(reason, "No trash entries to purge");
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for (id, _) in &doomed {
            batch.delete(TRASH_COLLECTION, id);
        }
        self.store.commit(batch).await?;

        let purged = doomed.len() as u64;
        tracing::info!(reason, purged, "Purged trash entries");
        Ok(purged)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until
    /// `cancel` fires. Sweep failures are logged and retried next tick.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Trash sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = self.sweep_expired(OffsetDateTime::now_utc()).await {
                    tracing::warn!(error = %e, "Trash sweep failed");
                }
            }
            tracing::info!("Trash sweeper stopped");
        })
    }
}
