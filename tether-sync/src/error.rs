//! Sync subsystem error types.

use tether_cloud::GatewayError;
use tether_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A server id could not be applied to the local record.
    #[error("cannot rekey {id}: {reason}")]
    Rekey { id: String, reason: String },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("sync subsystem has been disposed")]
    Disposed,

    #[error("invalid configuration: {0}")]
    Config(String),
}
