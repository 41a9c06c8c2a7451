//! Store wrapper with fault injection and call counting.

use async_trait::async_trait;
use bulwark_storage::{
    Document, DocumentStore, Filter, MemoryBackend, StoreError, StoreResult, Subscription,
    WriteBatch,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

/// In-memory store that fails commits touching selected ids and records how
/// many commits ran concurrently.
#[allow(dead_code)]
pub struct FlakyStore {
    inner: MemoryBackend,
    failing_ids: Mutex<HashSet<String>>,
    commit_delay: Duration,
    fail_after: AtomicUsize,
    pub commits: AtomicUsize,
    pub failed_commits: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every commit sleeps for `delay` before applying, so concurrent
    /// commits overlap.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            failing_ids: Mutex::new(HashSet::new()),
            commit_delay: delay,
            fail_after: AtomicUsize::new(usize::MAX),
            commits: AtomicUsize::new(0),
            failed_commits: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Make every commit that touches `id` fail.
    pub fn fail_on(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    /// Let the first `n` commits through and fail every later one.
    pub fn fail_after(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let seq = self.commits.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.commit_delay.is_zero() {
            tokio::time::sleep(self.commit_delay).await;
        }

        let poisoned = if seq >= self.fail_after.load(Ordering::SeqCst) {
            Some(format!("commit #{seq}"))
        } else {
            let failing = self.failing_ids.lock().unwrap();
            batch
                .ops()
                .iter()
                .find(|op| failing.contains(op.id()))
                .map(|op| op.id().to_string())
        };
        let result = match poisoned {
            Some(id) => {
                self.failed_commits.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable(format!("injected failure for {id}")))
            }
            None => self.inner.commit(batch).await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<(String, Document)>> {
        self.inner.query(collection, filter).await
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        self.inner.subscribe(collection)
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
