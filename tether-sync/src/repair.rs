//! Startup repair of records and queue entries that lost their counterpart.
//!
//! Every pending record should have exactly one queue entry and vice versa.
//! Storage writes both sides in one transaction, so a mismatch only appears
//! after external tampering or a crash in an older build; repair restores the
//! pairing before the first pass runs.

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use chrono::Utc;
use std::collections::HashSet;
use tether_cloud::CloudGateway;
use tether_storage::{LocalRecordStore, SyncQueue};
use tether_types::{QueueEntry, Record, RecordFilter, RecordId, SyncOperation};
use tracing::{info, warn};

/// What a repair pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Records rebuilt from an orphaned create/update entry.
    pub rebuilt_records: usize,
    /// Provisional records that got their missing create re-queued.
    pub requeued_creates: usize,
    /// Canonical records confirmed on the server and settled.
    pub confirmed: usize,
    /// Canonical records that got an update re-queued.
    pub requeued_updates: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

pub async fn repair_orphans(
    store: &LocalRecordStore,
    queue: &SyncQueue,
    gateway: &dyn CloudGateway,
    monitor: &ConnectivityMonitor,
) -> SyncResult<RepairReport> {
    let mut report = RepairReport::default();
    let entity_type = store.entity_type().to_string();

    // Queue entries whose record is missing.
    let entries = queue.list_pending()?;
    for entry in &entries {
        if entry.operation == SyncOperation::Delete || store.get(&entry.record_id)?.is_some() {
            continue;
        }
        let now = Utc::now();
        let record = Record {
            id: entry.record_id.clone(),
            entity_type: entity_type.clone(),
            attributes: entry.payload.clone(),
            created_at: entry.enqueued_at,
            updated_at: now,
            pending_sync: true,
            error_state: None,
        };
        store.put(&record)?;
        warn!("[SYNC] rebuilt missing record {} from its queued {}", record.id, entry.operation);
        report.rebuilt_records += 1;
    }

    // Pending records whose queue entry is missing.
    let queued: HashSet<RecordId> = entries.into_iter().map(|e| e.record_id).collect();
    for mut record in store.list(RecordFilter::pending())? {
        if queued.contains(&record.id) {
            continue;
        }
        match &record.id {
            RecordId::Provisional(_) => {
                let entry = QueueEntry::new(
                    record.id.clone(),
                    entity_type.clone(),
                    SyncOperation::Create,
                    record.attributes.clone(),
                );
                store.put_pending(&record, entry)?;
                warn!("[SYNC] re-queued create for orphaned record {}", record.id);
                report.requeued_creates += 1;
            }
            RecordId::Canonical(id) => {
                let on_server = if monitor.is_online() {
                    match gateway.get(&entity_type, id).await {
                        Ok(found) => found.is_some(),
                        Err(e) => {
                            warn!("[SYNC] could not confirm {id} during repair: {e}");
                            false
                        }
                    }
                } else {
                    false
                };

                if on_server {
                    record.pending_sync = false;
                    store.put(&record)?;
                    report.confirmed += 1;
                } else {
                    let entry = QueueEntry::new(
                        record.id.clone(),
                        entity_type.clone(),
                        SyncOperation::Update,
                        record.attributes.clone(),
                    );
                    store.put_pending(&record, entry)?;
                    warn!("[SYNC] re-queued update for orphaned record {id}");
                    report.requeued_updates += 1;
                }
            }
        }
    }

    if !report.is_clean() {
        info!("[SYNC] startup repair: {report:?}");
    }
    Ok(report)
}
