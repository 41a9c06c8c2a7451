use bulwark_storage::{Document, DocumentStore, FilesystemBackend, MemoryBackend};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// A small alert document with the given status.
pub fn alert_doc(status: &str) -> Document {
    json!({
        "status": status,
        "alertName": "Brute force",
        "tenant": "acme",
        "sourceGeo": {"country": "NL", "city": "Amsterdam"},
    })
    .as_object()
    .cloned()
    .unwrap()
}

/// One store per backend. The temp dir must outlive the filesystem store.
pub async fn backends() -> (TempDir, Vec<Arc<dyn DocumentStore>>) {
    let dir = TempDir::new().unwrap();
    let fs = FilesystemBackend::open(dir.path()).await.unwrap();
    let stores: Vec<Arc<dyn DocumentStore>> = vec![Arc::new(MemoryBackend::new()), Arc::new(fs)];
    (dir, stores)
}
