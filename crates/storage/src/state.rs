//! In-memory document state shared by the backends.
//!
//! Batches are applied in two steps: [`Collections::resolve`] validates every
//! write against the current state and turns updates into full documents, then
//! [`Collections::apply`] performs the resolved writes, which cannot fail. A
//! batch that fails to resolve leaves the state untouched.

use crate::error::{StoreError, StoreResult};
use crate::traits::{ChangeEvent, ChangeKind, Document, Filter, WriteBatch, WriteOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Maximum length of a collection name or document id.
const MAX_KEY_LEN: usize = 200;

/// A write with updates already merged into complete documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ResolvedWrite {
    Put {
        collection: String,
        id: String,
        data: Document,
    },
    Remove {
        collection: String,
        id: String,
    },
}

impl ResolvedWrite {
    /// The `(collection, id)` this write touches.
    pub fn key(&self) -> (&str, &str) {
        match self {
            Self::Put { collection, id, .. } | Self::Remove { collection, id } => {
                (collection.as_str(), id.as_str())
            }
        }
    }
}

/// All collections of a store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collections(BTreeMap<String, BTreeMap<String, Document>>);

impl Collections {
    pub fn get(&self, collection: &str, id: &str) -> StoreResult<Option<&Document>> {
        validate_key("collection", collection)?;
        validate_key("id", id)?;
        Ok(self.0.get(collection).and_then(|docs| docs.get(id)))
    }

    pub fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<(String, Document)>> {
        validate_key("collection", collection)?;
        let Some(docs) = self.0.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    pub fn document_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    /// Validate a batch and resolve it into infallible writes.
    pub fn resolve(&self, batch: &WriteBatch) -> StoreResult<Vec<ResolvedWrite>> {
        // Documents as they look after the earlier writes of this batch.
        let mut staged: HashMap<(&str, &str), Option<Document>> = HashMap::new();
        let mut resolved = Vec::with_capacity(batch.len());

        for op in batch.ops() {
            validate_key("collection", op.collection())?;
            validate_key("id", op.id())?;
            let key = (op.collection(), op.id());

            match op {
                WriteOp::Set {
                    collection,
                    id,
                    data,
                } => {
                    staged.insert(key, Some(data.clone()));
                    resolved.push(ResolvedWrite::Put {
                        collection: collection.clone(),
                        id: id.clone(),
                        data: data.clone(),
                    });
                }
                WriteOp::Update {
                    collection,
                    id,
                    patch,
                } => {
                    let current = match staged.get(&key) {
                        Some(doc) => doc.clone(),
                        None => self.0.get(collection).and_then(|d| d.get(id)).cloned(),
                    };
                    let mut merged =
                        current.ok_or_else(|| StoreError::not_found(collection, id))?;
                    for (path, value) in patch {
                        set_path(&mut merged, path, value.clone());
                    }
                    staged.insert(key, Some(merged.clone()));
                    resolved.push(ResolvedWrite::Put {
                        collection: collection.clone(),
                        id: id.clone(),
                        data: merged,
                    });
                }
                WriteOp::Delete { collection, id } => {
                    staged.insert(key, None);
                    resolved.push(ResolvedWrite::Remove {
                        collection: collection.clone(),
                        id: id.clone(),
                    });
                }
            }
        }

        Ok(resolved)
    }

    /// Apply resolved writes, returning the change events they produce.
    pub fn apply(&mut self, writes: &[ResolvedWrite]) -> Vec<ChangeEvent> {
        let mut events = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                ResolvedWrite::Put {
                    collection,
                    id,
                    data,
                } => {
                    self.0
                        .entry(collection.clone())
                        .or_default()
                        .insert(id.clone(), data.clone());
                    events.push(ChangeEvent {
                        collection: collection.clone(),
                        id: id.clone(),
                        kind: ChangeKind::Upserted,
                    });
                }
                ResolvedWrite::Remove { collection, id } => {
                    let removed = self
                        .0
                        .get_mut(collection)
                        .and_then(|docs| docs.remove(id))
                        .is_some();
                    if removed {
                        events.push(ChangeEvent {
                            collection: collection.clone(),
                            id: id.clone(),
                            kind: ChangeKind::Deleted,
                        });
                    }
                }
            }
        }
        events
    }

    /// Writes that put every document touched by `writes` back to its state
    /// in `self`. Applied in order, they revert `writes`.
    pub fn undo(&self, writes: &[ResolvedWrite]) -> Vec<ResolvedWrite> {
        writes
            .iter()
            .rev()
            .map(|write| {
                let (collection, id) = write.key();
                match self.0.get(collection).and_then(|docs| docs.get(id)) {
                    Some(data) => ResolvedWrite::Put {
                        collection: collection.to_string(),
                        id: id.to_string(),
                        data: data.clone(),
                    },
                    None => ResolvedWrite::Remove {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    },
                }
            })
            .collect()
    }

    pub(crate) fn insert(&mut self, collection: String, id: String, data: Document) {
        self.0.entry(collection).or_default().insert(id, data);
    }
}

/// Set a value at a dotted path, creating intermediate objects as needed.
fn set_path(document: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            document.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !child.is_object() {
                *child = Value::Object(Document::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

/// Reject names that are empty, oversized or unsafe as path components.
pub fn validate_key(what: &str, key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey(format!("empty {what}")));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidKey(format!(
            "{what} longer than {MAX_KEY_LEN} bytes"
        )));
    }
    if key.starts_with('.')
        || key.contains(['/', '\\'])
        || key.chars().any(char::is_control)
    {
        return Err(StoreError::InvalidKey(format!("unsafe {what}: {key:?}")));
    }
    Ok(())
}
