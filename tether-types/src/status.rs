//! Aggregate sync reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which filter to apply when listing local records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// `Some(true)` keeps only pending records, `Some(false)` only settled ones.
    pub pending_sync: Option<bool>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self { pending_sync: None }
    }

    pub fn pending() -> Self {
        Self {
            pending_sync: Some(true),
        }
    }

    pub fn settled() -> Self {
        Self {
            pending_sync: Some(false),
        }
    }
}

/// Counters produced by a single reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entries taken off the queue this pass.
    pub processed: usize,
    /// Entries uploaded and rewritten to canonical state.
    pub reconciled: usize,
    /// Entries that failed permanently and were flagged on their record.
    pub failed: usize,
    /// Entries still queued when the pass ended.
    pub pending: usize,
    /// True when the pass did nothing because the store was unreachable.
    pub skipped_offline: bool,
    /// True when the pass stopped early on a transient failure or backoff.
    pub interrupted: bool,
}

impl SyncReport {
    pub fn offline(pending: usize) -> Self {
        Self {
            pending,
            skipped_offline: true,
            ..Self::default()
        }
    }

    /// True iff the queue was empty at the end of the pass.
    pub fn is_drained(&self) -> bool {
        self.pending == 0
    }
}

/// Sync status snapshot reported to callers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: usize,
    pub failed_count: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
}
