//! Local record store: records created offline plus cached canonical records.
//!
//! Every multi-row change (rekey, reconcile, failure marking, pending writes)
//! runs in a single DuckDB transaction that also touches the `sync_queue`
//! table, so a crash can never leave a record and its queue entry disagreeing
//! about the record's identifier.

use crate::database::{self, LocalDatabase, flight_key};
use crate::error::{StorageError, StorageResult};
use crate::sync_queue::{EnqueueOutcome, enqueue_in};
use tether_types::{
    CanonicalRecord, ErrorState, QueueEntry, Record, RecordFilter, RecordId, SyncOperation,
    merge_patch,
};
use tracing::debug;

/// Durable record storage keyed by id, scoped to one entity type.
#[derive(Clone)]
pub struct LocalRecordStore {
    db: LocalDatabase,
    entity_type: String,
}

impl LocalRecordStore {
    pub(crate) fn new(db: LocalDatabase, entity_type: String) -> Self {
        Self { db, entity_type }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn check_scope(&self, record: &Record) -> StorageResult<()> {
        if record.entity_type != self.entity_type {
            return Err(StorageError::Unavailable(format!(
                "record {} has entity type {:?}, store is scoped to {:?}",
                record.id, record.entity_type, self.entity_type
            )));
        }
        Ok(())
    }

    /// Upserts a record.
    pub fn put(&self, record: &Record) -> StorageResult<()> {
        self.check_scope(record)?;
        let conn = self.db.lock()?;
        database::upsert_record(&conn, record)
    }

    /// Upserts a record and enqueues its mutation in one transaction.
    pub fn put_pending(&self, record: &Record, entry: QueueEntry) -> StorageResult<EnqueueOutcome> {
        self.check_scope(record)?;
        let in_flight = self.db.in_flight()?.clone();
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        database::upsert_record(&tx, record)?;
        let outcome = enqueue_in(&tx, &in_flight, entry)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get(&self, id: &RecordId) -> StorageResult<Option<Record>> {
        let conn = self.db.lock()?;
        database::load_record(&conn, &self.entity_type, id)
    }

    /// Lists records, oldest first, optionally filtered by `pending_sync`.
    pub fn list(&self, filter: RecordFilter) -> StorageResult<Vec<Record>> {
        let conn = self.db.lock()?;
        database::load_records(&conn, &self.entity_type, filter.pending_sync)
    }

    /// Removes a record. Returns true if it existed.
    pub fn remove(&self, id: &RecordId) -> StorageResult<bool> {
        let conn = self.db.lock()?;
        Ok(database::delete_record(&conn, &self.entity_type, id)? > 0)
    }

    /// Removes a record and enqueues its mutation in one transaction.
    pub fn remove_pending(&self, id: &RecordId, entry: QueueEntry) -> StorageResult<EnqueueOutcome> {
        let in_flight = self.db.in_flight()?.clone();
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        database::delete_record(&tx, &self.entity_type, id)?;
        let outcome = enqueue_in(&tx, &in_flight, entry)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Renames a provisional record to its canonical id, together with its
    /// queue entry, in one transaction.
    pub fn rekey(&self, old: &RecordId, new: &RecordId) -> StorageResult<()> {
        check_rekey(old, new)?;

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let record = database::load_record(&tx, &self.entity_type, old)?;
        let entry = database::load_entry(&tx, &self.entity_type, old)?;
        if record.is_none() && entry.is_none() {
            return Err(StorageError::NotFound(old.to_string()));
        }

        if let Some(mut record) = record {
            database::delete_record(&tx, &self.entity_type, old)?;
            record.id = new.clone();
            database::upsert_record(&tx, &record)?;
        }
        if let Some(mut entry) = entry {
            database::delete_entry(&tx, &self.entity_type, old)?;
            entry.record_id = new.clone();
            database::insert_entry(&tx, &entry)?;
        }
        tx.commit()?;
        drop(conn);

        let mut in_flight = self.db.in_flight()?;
        if in_flight.remove(&flight_key(&self.entity_type, old)) {
            in_flight.insert(flight_key(&self.entity_type, new));
        }
        debug!("rekeyed {old} -> {new}");
        Ok(())
    }

    /// Applies a successful upload: rekeys the record to the canonical id,
    /// merges server fields, clears `pending_sync`, and acknowledges the
    /// queue entry, all in one transaction.
    ///
    /// If the queue entry was superseded by a local edit while `uploaded` was
    /// in flight, the record stays pending and the entry is carried over to
    /// the canonical id as an update. Returns the stored record, or `None`
    /// when no local record exists (deletes).
    pub fn reconcile(
        &self,
        uploaded: &QueueEntry,
        canonical: &CanonicalRecord,
    ) -> StorageResult<Option<Record>> {
        let old = &uploaded.record_id;
        let new = RecordId::canonical(canonical.id.clone())
            .map_err(|e| StorageError::InvalidRekey(e.to_string()))?;
        if old.is_canonical() && *old != new {
            return Err(StorageError::InvalidRekey(format!(
                "canonical id {old} cannot be rewritten to {new}"
            )));
        }

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let local = database::load_record(&tx, &self.entity_type, old)?;
        let queued = database::load_entry(&tx, &self.entity_type, old)?;
        let superseded = queued
            .as_ref()
            .is_some_and(|q| q.operation != uploaded.operation || q.payload != uploaded.payload);

        let stored = match local {
            Some(mut record) => {
                if !superseded && !canonical.attributes.is_null() {
                    merge_patch(&mut record.attributes, &canonical.attributes);
                }
                record.id = new.clone();
                record.created_at = canonical.created_at;
                if !superseded {
                    record.updated_at = canonical.updated_at;
                }
                record.pending_sync = superseded;
                record.error_state = None;
                if old != &new {
                    database::delete_record(&tx, &self.entity_type, old)?;
                }
                database::upsert_record(&tx, &record)?;
                Some(record)
            }
            None => None,
        };

        match (superseded, queued) {
            (true, Some(mut carried)) => {
                carried.record_id = new.clone();
                if carried.operation == SyncOperation::Create {
                    carried.operation = SyncOperation::Update;
                }
                carried.attempts = 0;
                carried.last_error = None;
                if old == &new {
                    database::update_entry(&tx, &carried)?;
                } else {
                    database::delete_entry(&tx, &self.entity_type, old)?;
                    database::insert_entry(&tx, &carried)?;
                }
            }
            (false, Some(_)) => {
                database::delete_entry(&tx, &self.entity_type, old)?;
            }
            (_, None) => {}
        }
        tx.commit()?;
        drop(conn);

        self.db.in_flight()?.remove(&flight_key(&self.entity_type, old));
        if superseded {
            debug!("reconciled {old} -> {new}; newer local edit re-queued");
        } else {
            debug!("reconciled {old} -> {new}");
        }
        Ok(stored)
    }

    /// Flags a record as permanently failed and drops its queue entry.
    pub fn mark_failed(&self, id: &RecordId, error: ErrorState) -> StorageResult<Option<Record>> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let record = database::load_record(&tx, &self.entity_type, id)?;
        let updated = match record {
            Some(mut record) => {
                record.pending_sync = false;
                record.error_state = Some(error);
                database::upsert_record(&tx, &record)?;
                Some(record)
            }
            None => None,
        };
        database::delete_entry(&tx, &self.entity_type, id)?;
        tx.commit()?;
        drop(conn);

        self.db.in_flight()?.remove(&flight_key(&self.entity_type, id));
        Ok(updated)
    }

    /// Drops a record and its queue entry together.
    pub fn discard(&self, id: &RecordId) -> StorageResult<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        database::delete_record(&tx, &self.entity_type, id)?;
        database::delete_entry(&tx, &self.entity_type, id)?;
        tx.commit()?;
        Ok(())
    }
}

fn check_rekey(old: &RecordId, new: &RecordId) -> StorageResult<()> {
    match (old, new) {
        (RecordId::Provisional(_), RecordId::Canonical(_)) => Ok(()),
        (RecordId::Canonical(_), _) => Err(StorageError::InvalidRekey(format!(
            "{old} is canonical; only provisional ids may be rewritten"
        ))),
        (_, RecordId::Provisional(_)) => Err(StorageError::InvalidRekey(format!(
            "target {new} is not a canonical id"
        ))),
    }
}
