//! The synchronized record and its server-side counterpart.

use crate::id::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record as returned by the cloud store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Why a record permanently failed to reconcile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Rejected,
    Unauthorized,
    Conflict,
    NotFound,
}

/// Failure attached to a record that will not be retried automatically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    pub kind: ErrorKind,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl ErrorState {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Per-record sync state, derived from `pending_sync` and `error_state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Provisional,
    Reconciled,
    Failed,
}

/// A domain entity tracked by the sync engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub entity_type: String,
    /// Domain fields; opaque to the engine.
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pending_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_state: Option<ErrorState>,
}

impl Record {
    /// Builds a fresh provisional record with client-assigned timestamps.
    pub fn provisional(entity_type: impl Into<String>, attributes: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new_provisional(),
            entity_type: entity_type.into(),
            attributes,
            created_at: now,
            updated_at: now,
            pending_sync: true,
            error_state: None,
        }
    }

    /// Builds a reconciled record from the server's copy.
    ///
    /// Ids carrying the reserved prefix are classified as provisional by
    /// [`RecordId::parse`]; callers validate canonical ids before this point.
    pub fn from_canonical(entity_type: impl Into<String>, canonical: CanonicalRecord) -> Self {
        Self {
            id: RecordId::parse(&canonical.id),
            entity_type: entity_type.into(),
            attributes: canonical.attributes,
            created_at: canonical.created_at,
            updated_at: canonical.updated_at,
            pending_sync: false,
            error_state: None,
        }
    }

    pub fn state(&self) -> RecordState {
        if self.error_state.is_some() {
            RecordState::Failed
        } else if self.pending_sync {
            RecordState::Provisional
        } else {
            RecordState::Reconciled
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    /// Reads a string attribute by JSON pointer (e.g. `"/name"`).
    pub fn get_str(&self, pointer: &str) -> Option<&str> {
        self.attributes.pointer(pointer).and_then(|v| v.as_str())
    }
}

/// Applies a JSON merge patch: object keys in `patch` overwrite `target`,
/// `null` removes a key, non-object patches replace the target wholesale.
pub fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let Some(patch_obj) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let Some(target_obj) = target.as_object_mut() {
        for (key, value) in patch_obj {
            if value.is_null() {
                target_obj.remove(key);
            } else {
                merge_patch(
                    target_obj.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
    }
}
