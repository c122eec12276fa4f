//! Local storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the local record store and sync queue.
///
/// None of these are swallowed: losing a provisional write means losing data
/// the user created offline.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid rekey: {0}")]
    InvalidRekey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}
