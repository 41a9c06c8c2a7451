//! In-process document store.

use crate::error::StoreResult;
use crate::state::Collections;
use crate::traits::{ChangeEvent, Document, DocumentStore, Filter, Subscription, WriteBatch};
use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::instrument;

/// Capacity of the change event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Document store held entirely in memory.
///
/// Commits take the write lock for the whole batch, so readers never observe
/// a partially applied batch.
pub struct MemoryBackend {
    state: RwLock<Collections>,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(Collections::default()),
            events,
        }
    }

    /// Total number of documents across all collections.
    pub async fn document_count(&self) -> usize {
        self.state.read().await.document_count()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.state.read().await.get(collection, id)?.cloned())
    }

    #[instrument(skip(self, batch), fields(backend = "memory", ops = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let events = {
            let mut state = self.state.write().await;
            let writes = state.resolve(&batch)?;
            state.apply(&writes)
        };
        for event in events {
            // No receivers is fine.
            let _ = self.events.send(event);
        }
        Ok(())
    }

    #[instrument(skip(self, filter), fields(backend = "memory"))]
    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Vec<(String, Document)>> {
        self.state.read().await.query(collection, filter)
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        Subscription::new(collection, self.events.subscribe())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
