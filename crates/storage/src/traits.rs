//! Document store gateway definitions.
//!
//! The gateway is the only way Bulwark reaches persisted records. It offers
//! single-document reads and writes, all-or-nothing write batches, filtered
//! collection queries and change subscriptions.

use crate::error::StoreResult;
use async_trait::async_trait;
pub use bulwark_core::Document;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// A single write inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Create or replace a document.
    Set {
        collection: String,
        id: String,
        data: Document,
    },
    /// Merge fields into an existing document. Keys may be dotted paths
    /// (`sourceGeo.country`) to address nested fields. Fails if the document
    /// does not exist.
    Update {
        collection: String,
        id: String,
        patch: Document,
    },
    /// Remove a document. Removing a missing document is not an error.
    Delete { collection: String, id: String },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            Self::Set { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Set { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// An ordered group of writes committed atomically: either every write is
/// applied or none is.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, collection: &str, id: &str, data: Document) -> &mut Self {
        self.ops.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
        self
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Document) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        });
        self
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

impl From<WriteOp> for WriteBatch {
    fn from(op: WriteOp) -> Self {
        Self { ops: vec![op] }
    }
}

/// A condition a document must satisfy to be returned by a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Field equals the given value.
    Eq { field: String, value: Value },
    /// Field holds an RFC 3339 timestamp at or before the given instant.
    /// Documents where the field is missing or unparsable never match.
    AtOrBefore { field: String, instant: OffsetDateTime },
}

impl Predicate {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Eq { field, value } => lookup(document, field) == Some(value),
            Self::AtOrBefore { field, instant } => lookup(document, field)
                .and_then(Value::as_str)
                .and_then(|s| {
                    OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok()
                })
                .is_some_and(|ts| ts <= *instant),
        }
    }
}

/// Conjunction of predicates handed to [`DocumentStore::query`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// A filter matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn at_or_before(mut self, field: &str, instant: OffsetDateTime) -> Self {
        self.predicates.push(Predicate::AtOrBefore {
            field: field.to_string(),
            instant,
        });
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.predicates.iter().all(|p| p.matches(document))
    }
}

/// Resolve a dotted field path inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Kind of change observed on a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

/// A committed change to one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

/// Live feed of changes to one collection.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    collection: String,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(collection: &str, receiver: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            collection: collection.to_string(),
            receiver,
        }
    }

    /// Wait for the next change in the subscribed collection.
    ///
    /// Returns `None` once the store is dropped. Events lost to a slow
    /// consumer are skipped with a warning.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.collection == self.collection => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        collection = %self.collection,
                        skipped,
                        "Change subscription lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Document store gateway.
///
/// Backends implement [`commit`](Self::commit); the single-document writes
/// default to one-op batches.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch a document by id.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Check whether a document exists.
    async fn exists(&self, collection: &str, id: &str) -> StoreResult<bool> {
        Ok(self.get(collection, id).await?.is_some())
    }

    /// Create or replace a document.
    async fn set(&self, collection: &str, id: &str, data: Document) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.set(collection, id, data);
        self.commit(batch).await
    }

    /// Merge fields into an existing document.
    async fn update(&self, collection: &str, id: &str, patch: Document) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.update(collection, id, patch);
        self.commit(batch).await
    }

    /// Remove a document.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, id);
        self.commit(batch).await
    }

    /// Apply every write in the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Return `(id, document)` pairs matching the filter, ordered by id.
    async fn query(&self, collection: &str, filter: &Filter)
    -> StoreResult<Vec<(String, Document)>>;

    /// Subscribe to committed changes in a collection.
    fn subscribe(&self, collection: &str) -> Subscription;

    /// Static identifier of the backend, used in logs.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is usable.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
