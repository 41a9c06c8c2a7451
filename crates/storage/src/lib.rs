//! Document store gateway and backends for Bulwark.
//!
//! This crate provides:
//! - The [`DocumentStore`] trait: point reads, atomic write batches,
//!   filtered queries and change subscriptions
//! - Backends: in-process memory and local filesystem

pub mod backends;
pub mod error;
mod state;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StoreError, StoreResult};
pub use traits::{
    ChangeEvent, ChangeKind, Document, DocumentStore, Filter, Predicate, Subscription, WriteBatch,
    WriteOp, lookup,
};

use bulwark_core::config::StoreConfig;
use std::sync::Arc;

/// Create a document store from configuration.
pub async fn from_config(config: &StoreConfig) -> StoreResult<Arc<dyn DocumentStore>> {
    config.validate().map_err(StoreError::Config)?;

    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        StoreConfig::Filesystem { path } => {
            let backend = FilesystemBackend::open(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
