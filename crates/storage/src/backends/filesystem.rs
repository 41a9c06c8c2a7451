//! Local filesystem document store.
//!
//! Layout under the root directory:
//!
//! ```text
//! collections/<collection>/<id>.json   one file per document
//! journal.json                         pending multi-document batch
//! ```
//!
//! Every file is written to a uniquely named temp file, synced, then renamed
//! into place. A batch touching more than one document is first written to
//! the journal; the journal is removed once every document file has been
//! updated, and replayed on open (or before the next commit) if a crash
//! interrupted it.
//!
//! A commit that fails with an I/O error reverts the document files it had
//! already written before returning `Err`, so a failed batch never takes
//! effect later. The revert goes through the journal as well. Only if the
//! revert itself cannot be started is the original journal left in place, and
//! the batch is then completed on the next replay.

use crate::backends::memory::EVENT_CHANNEL_CAPACITY;
use crate::error::{StoreError, StoreResult};
use crate::state::{Collections, ResolvedWrite};
use crate::traits::{ChangeEvent, Document, DocumentStore, Filter, Subscription, WriteBatch};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, broadcast};
use tracing::instrument;
use uuid::Uuid;

const COLLECTIONS_DIR: &str = "collections";
const JOURNAL_FILE: &str = "journal.json";
const TEMP_MARKER: &str = ".tmp.";

/// Filesystem-backed document store with an in-memory read cache.
pub struct FilesystemBackend {
    root: PathBuf,
    cache: RwLock<Collections>,
    events: broadcast::Sender<ChangeEvent>,
}

impl FilesystemBackend {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Replays an interrupted batch, removes stale temp files and loads every
    /// document into the cache.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(COLLECTIONS_DIR)).await?;

        let mut cache = load_collections(&root).await?;
        replay_journal(&root, &mut cache).await?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        tracing::info!(
            root = %root.display(),
            documents = cache.document_count(),
            "Opened filesystem document store"
        );
        Ok(Self {
            root,
            cache: RwLock::new(cache),
            events,
        })
    }
}

#[async_trait]
impl DocumentStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.cache.read().await.get(collection, id)?.cloned())
    }

    #[instrument(skip(self, batch), fields(backend = "filesystem", ops = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let events = {
            let mut cache = self.cache.write().await;
            replay_journal(&self.root, &mut cache).await?;

            let writes = cache.resolve(&batch)?;
            if writes.len() > 1 {
                persist_journaled(&self.root, &cache, &writes).await?;
            } else {
                for write in &writes {
                    apply_to_disk(&self.root, write).await?;
                }
            }
            cache.apply(&writes)
        };

        for event in events {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    #[instrument(skip(self, filter), fields(backend = "filesystem"))]
    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Vec<(String, Document)>> {
        self.cache.read().await.query(collection, filter)
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        Subscription::new(collection, self.events.subscribe())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn health_check(&self) -> StoreResult<()> {
        let meta = fs::metadata(self.root.join(COLLECTIONS_DIR)).await?;
        if !meta.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.root.join(COLLECTIONS_DIR).display()
            )));
        }
        if fs::try_exists(self.root.join(JOURNAL_FILE)).await? {
            tracing::warn!(root = %self.root.display(), "Store has a pending journal");
        }
        Ok(())
    }
}

fn document_path(root: &Path, collection: &str, id: &str) -> PathBuf {
    root.join(COLLECTIONS_DIR)
        .join(collection)
        .join(format!("{id}.json"))
}

/// Write a file via temp file, fsync and rename.
async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_name = format!("{TEMP_MARKER}{}", Uuid::new_v4());
    let temp_path = path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or_else(|| temp_name.clone()),
    );
    {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
    }
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::Io(e));
    }
    Ok(())
}

async fn apply_to_disk(root: &Path, write: &ResolvedWrite) -> StoreResult<()> {
    match write {
        ResolvedWrite::Put {
            collection,
            id,
            data,
        } => {
            let path = document_path(root, collection, id);
            write_atomic(&path, &serde_json::to_vec_pretty(data)?).await
        }
        ResolvedWrite::Remove { collection, id } => {
            match fs::remove_file(document_path(root, collection, id)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::Io(e)),
            }
        }
    }
}

/// Write a multi-document batch through the journal. `cache` must still hold
/// the state from before the batch.
async fn persist_journaled(
    root: &Path,
    cache: &Collections,
    writes: &[ResolvedWrite],
) -> StoreResult<()> {
    let journal = root.join(JOURNAL_FILE);
    write_atomic(&journal, &serde_json::to_vec(writes)?).await?;

    for (applied, write) in writes.iter().enumerate() {
        if let Err(e) = apply_to_disk(root, write).await {
            // A failed write leaves its own file untouched; revert the ones before it.
            let undo = cache.undo(&writes[..applied]);
            match roll_back(root, &undo).await {
                Ok(()) => {
                    tracing::warn!(error = %e, reverted = undo.len(), "Rolled back failed batch")
                }
                Err(rollback) => tracing::error!(
                    error = %e,
                    rollback_error = %rollback,
                    "Rollback failed, journal left for replay"
                ),
            }
            return Err(e);
        }
    }

    if let Err(e) = fs::remove_file(&journal).await {
        // Every document is on disk; a replay would rewrite the same contents.
        tracing::warn!(error = %e, "Could not remove journal after commit");
    }
    Ok(())
}

/// Replace the journal with `undo` and apply it.
async fn roll_back(root: &Path, undo: &[ResolvedWrite]) -> StoreResult<()> {
    let journal = root.join(JOURNAL_FILE);
    write_atomic(&journal, &serde_json::to_vec(undo)?).await?;
    for write in undo {
        apply_to_disk(root, write).await?;
    }
    fs::remove_file(&journal).await?;
    Ok(())
}

/// Finish a batch left behind by an interrupted commit.
async fn replay_journal(root: &Path, cache: &mut Collections) -> StoreResult<()> {
    let journal = root.join(JOURNAL_FILE);
    let data = match fs::read(&journal).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::Io(e)),
    };
    let writes: Vec<ResolvedWrite> = serde_json::from_slice(&data)?;
    tracing::warn!(writes = writes.len(), "Replaying interrupted batch from journal");

    for write in &writes {
        apply_to_disk(root, write).await?;
    }
    cache.apply(&writes);
    fs::remove_file(&journal).await?;
    Ok(())
}

async fn load_collections(root: &Path) -> StoreResult<Collections> {
    let mut collections = Collections::default();
    let mut dirs = fs::read_dir(root.join(COLLECTIONS_DIR)).await?;

    while let Some(dir) = dirs.next_entry().await? {
        // Symlinks are ignored so nothing outside the root is read.
        if !dir.file_type().await?.is_dir() {
            continue;
        }
        let collection = dir.file_name().to_string_lossy().to_string();

        let mut files = fs::read_dir(dir.path()).await?;
        while let Some(file) = files.next_entry().await? {
            if !file.file_type().await?.is_file() {
                continue;
            }
            let name = file.file_name().to_string_lossy().to_string();
            if name.contains(TEMP_MARKER) {
                tracing::debug!(file = %file.path().display(), "Removing stale temp file");
                fs::remove_file(file.path()).await?;
                continue;
            }
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            let data = fs::read(file.path()).await?;
            let document: Document = serde_json::from_slice(&data).map_err(|e| {
                StoreError::Unavailable(format!(
                    "corrupt document {}: {e}",
                    file.path().display()
                ))
            })?;
            collections.insert(collection.clone(), id.to_string(), document);
        }
    }

    Ok(collections)
}
