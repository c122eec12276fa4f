//! Pending mutation entries.

use crate::id::RecordId;
use crate::record::merge_patch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of mutation waiting to be uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sync operation: {0}")]
pub struct UnknownOperation(pub String);

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl FromStr for SyncOperation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued local mutation awaiting upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Local identifier being tracked (the provisional id for creates).
    pub record_id: RecordId,
    pub entity_type: String,
    pub operation: SyncOperation,
    /// Body submitted to the cloud store.
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Insertion sequence; breaks ties between equal `enqueued_at` values.
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn new(
        record_id: RecordId,
        entity_type: impl Into<String>,
        operation: SyncOperation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            record_id,
            entity_type: entity_type.into(),
            operation,
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
            seq: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }
}

/// Outcome of folding a new mutation into an already-queued one.
#[derive(Debug, Clone, PartialEq)]
pub enum Coalesced {
    /// Keep the existing slot with this operation and payload.
    Replace {
        operation: SyncOperation,
        payload: serde_json::Value,
    },
    /// Both mutations cancel out; drop the queued entry.
    Drop,
}

/// Folds `incoming` into the `existing` queued mutation for the same record.
///
/// The queue position and attempt count of `existing` are kept by the caller;
/// only the operation and payload change.
pub fn coalesce(existing: &QueueEntry, incoming: &QueueEntry) -> Coalesced {
    use SyncOperation::*;
    match (existing.operation, incoming.operation) {
        (Create, Delete) => Coalesced::Drop,
        (Create, Update) | (Update, Update) => {
            let mut payload = existing.payload.clone();
            merge_patch(&mut payload, &incoming.payload);
            Coalesced::Replace {
                operation: existing.operation,
                payload,
            }
        }
        (_, Delete) => Coalesced::Replace {
            operation: Delete,
            payload: serde_json::Value::Null,
        },
        // A re-create or an edit after a queued delete supersedes it.
        (_, op) => Coalesced::Replace {
            operation: op,
            payload: incoming.payload.clone(),
        },
    }
}
