//! Engine error types.

use bulwark_storage::StoreError;

/// Errors raised by trash lifecycle and orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    #[error("trash entry {trash_id} has incomplete metadata: {missing}")]
    IncompleteMetadata { trash_id: String, missing: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already in trash: {0}")]
    AlreadyTrashed(String),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("core error: {0}")]
    Core(#[from] bulwark_core::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
