//! Error types for persistence and blob storage.

use thiserror::Error;

/// Errors raised by the key-value store and the blob store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No blob, alias, or key under this name.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored abstract could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("backend error: {message}")]
    Backend { message: String },
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
