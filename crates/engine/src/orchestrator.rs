//! Bulk operations exposed to callers.
//!
//! Each bulk operation runs through the batch executor and reports a single
//! [`BatchResult`]. Deletes always go through the trash.

use crate::error::{EngineError, EngineResult};
use crate::executor::{BatchOperation, BatchResult};
use crate::trash::{RestoreOutcome, TrashManager};
use bulwark_core::codec::{self, RowWarning};
use bulwark_core::config::AppConfig;
use bulwark_core::{Alert, Document, Record, RecordKind};
use bulwark_storage::{DocumentStore, Filter};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Fields a bulk update may change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: Option<String>,
    pub verification_status: Option<String>,
}

impl StatusPatch {
    fn to_document(&self) -> EngineResult<Document> {
        let mut patch = Document::new();
        if let Some(status) = &self.status {
            patch.insert("status".to_string(), Value::String(status.clone()));
        }
        if let Some(verification) = &self.verification_status {
            patch.insert(
                "verificationStatus".to_string(),
                Value::String(verification.clone()),
            );
        }
        if patch.is_empty() {
            return Err(EngineError::InvalidPatch(
                "at least one of status or verification status is required".to_string(),
            ));
        }
        Ok(patch)
    }
}

/// Outcome of a CSV import.
#[derive(Clone, Debug, Default)]
pub struct ImportOutcome {
    pub result: BatchResult,
    /// Ids assigned to the decoded rows, in row order.
    pub ids: Vec<String>,
    pub warnings: Vec<RowWarning>,
    pub ignored_columns: Vec<String>,
}

/// Runs bulk mutations against the store.
pub struct MutationOrchestrator {
    store: Arc<dyn DocumentStore>,
    trash: Arc<TrashManager>,
    batch_size: usize,
    operator: String,
}

impl MutationOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        trash: Arc<TrashManager>,
        batch_size: usize,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            store,
            trash,
            batch_size: batch_size.max(1),
            operator: operator.into(),
        }
    }

    /// Build an orchestrator and its trash manager from configuration.
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &AppConfig) -> Self {
        let trash = Arc::new(TrashManager::new(store.clone(), config.trash.clone()));
        Self::new(
            store,
            trash,
            config.batch.batch_size,
            config.operator.name.clone(),
        )
    }

    pub fn trash(&self) -> &Arc<TrashManager> {
        &self.trash
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Name recorded as `deletedBy` / `restoredBy`.
    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Soft-delete every id. Cancellation stops scheduling; records already
    /// trashed stay trashed.
    pub async fn bulk_delete(
        &self,
        collection: &str,
        ids: &[String],
        op: &BatchOperation,
    ) -> EngineResult<BatchResult> {
        RecordKind::from_collection(collection)?;
        let trash = &self.trash;
        let operator = self.operator.as_str();

        Ok(op
            .execute("delete", ids, self.batch_size, |id| async move {
                trash.soft_delete(collection, &id, operator).await
            })
            .await)
    }

    /// Apply `patch` to every id.
    pub async fn bulk_update(
        &self,
        collection: &str,
        ids: &[String],
        patch: &StatusPatch,
        op: &BatchOperation,
    ) -> EngineResult<BatchResult> {
        RecordKind::from_collection(collection)?;
        let patch = patch.to_document()?;
        let store = &self.store;
        let patch = &patch;

        Ok(op
            .execute("update", ids, self.batch_size, |id| async move {
                store.update(collection, &id, patch.clone()).await
            })
            .await)
    }

    /// Decode CSV text and create one alert per row.
    ///
    /// Format errors are returned before anything is written. Rows that fail
    /// to save are reported in the result; saved rows are kept.
    pub async fn import_csv(&self, raw: &str, op: &BatchOperation) -> EngineResult<ImportOutcome> {
        let decoded = codec::decode_alerts(raw, OffsetDateTime::now_utc())?;
        if !decoded.ignored_columns.is_empty() {
            tracing::warn!(columns = ?decoded.ignored_columns, "Ignoring unknown CSV columns");
        }

        let collection = RecordKind::Alert.collection();
        let mut ids = Vec::with_capacity(decoded.alerts.len());
        let mut documents = HashMap::with_capacity(decoded.alerts.len());
        for alert in decoded.alerts {
            let id = Uuid::new_v4().to_string();
            documents.insert(id.clone(), Record::from(alert).to_document()?);
            ids.push(id);
        }

        let store = &self.store;
        let documents = &documents;
        let result = op
            .execute("import", &ids, self.batch_size, |id| async move {
                let document = documents
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(id.clone()))?;
                store.set(collection, &id, document).await?;
                Ok::<_, EngineError>(())
            })
            .await;

        Ok(ImportOutcome {
            result,
            ids,
            warnings: decoded.warnings,
            ignored_columns: decoded.ignored_columns,
        })
    }

    /// Encode every alert as CSV, ordered by timestamp then id.
    pub async fn export_csv(&self, collection: &str) -> EngineResult<String> {
        if RecordKind::from_collection(collection)? != RecordKind::Alert {
            return Err(bulwark_core::Error::Format(format!(
                "CSV export is only defined for alerts, not {collection}"
            ))
            .into());
        }

        let documents = self.store.query(collection, &Filter::all()).await?;
        let mut rows: Vec<(String, Alert)> = Vec::with_capacity(documents.len());
        for (id, document) in documents {
            match Record::from_document(RecordKind::Alert, document) {
                Ok(Record::Alert(alert)) => rows.push((id, alert)),
                Ok(_) => {}
                Err(e) => tracing::warn!(id = %id, error = %e, "Skipping unreadable alert"),
            }
        }
        rows.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(&b.0)));

        let alerts: Vec<Alert> = rows.into_iter().map(|(_, alert)| alert).collect();
        tracing::info!(collection, rows = alerts.len(), "Exported alerts");
        Ok(codec::encode_alerts(&alerts)?)
    }

    /// Restore every trash id. Entries that were already restored or purged
    /// count as successes.
    pub async fn bulk_restore(
        &self,
        ids: &[String],
        op: &BatchOperation,
    ) -> EngineResult<BatchResult> {
        let trash = &self.trash;
        let operator = self.operator.as_str();

        Ok(op
            .execute("restore", ids, self.batch_size, |id| async move {
                let outcome = trash.restore(&id, operator).await?;
                if outcome == RestoreOutcome::Missing {
                    tracing::debug!(trash_id = %id, "Nothing to restore");
                }
                Ok::<_, EngineError>(outcome)
            })
            .await)
    }
}
