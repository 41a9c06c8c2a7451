//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    #[error("invalid record in {collection}: {message}")]
    InvalidRecord { collection: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
