//! Persistent FIFO of local mutations awaiting upload.
//!
//! Entries are keyed by record id: a second mutation for a record that is
//! already queued is folded into the existing entry (keeping its position
//! and attempt count) instead of being appended.

use crate::database::{self, FlightKey, LocalDatabase, flight_key};
use crate::error::{StorageError, StorageResult};
use chrono::Utc;
use duckdb::Connection;
use std::collections::HashSet;
use tether_types::{Coalesced, QueueEntry, RecordId, SyncOperation, coalesce};
use tracing::debug;

/// What `enqueue` did with the incoming entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No entry existed for the record; appended at the tail.
    Appended,
    /// Folded into the existing entry for the record.
    Coalesced,
    /// Cancelled out the existing entry (create followed by delete).
    Dropped,
}

/// Ordered backlog of pending uploads, scoped to one entity type.
#[derive(Clone)]
pub struct SyncQueue {
    db: LocalDatabase,
    entity_type: String,
}

impl SyncQueue {
    pub(crate) fn new(db: LocalDatabase, entity_type: String) -> Self {
        Self { db, entity_type }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Appends an entry, or coalesces it into the record's existing entry.
    pub fn enqueue(&self, entry: QueueEntry) -> StorageResult<EnqueueOutcome> {
        if entry.entity_type != self.entity_type {
            return Err(StorageError::Unavailable(format!(
                "entry for {} has entity type {:?}, queue is scoped to {:?}",
                entry.record_id, entry.entity_type, self.entity_type
            )));
        }
        let in_flight = self.db.in_flight()?.clone();
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let outcome = enqueue_in(&tx, &in_flight, entry)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Returns the oldest entry not currently in flight and marks it in flight.
    pub fn dequeue_next(&self) -> StorageResult<Option<QueueEntry>> {
        let entries = self.list_pending()?;
        let mut in_flight = self.db.in_flight()?;
        let next = entries
            .into_iter()
            .find(|e| !in_flight.contains(&flight_key(&self.entity_type, &e.record_id)));
        if let Some(entry) = &next {
            in_flight.insert(flight_key(&self.entity_type, &entry.record_id));
        }
        Ok(next)
    }

    /// Removes an entry after a successful upload. Returns true if it existed.
    pub fn ack(&self, id: &RecordId) -> StorageResult<bool> {
        let removed = {
            let conn = self.db.lock()?;
            database::delete_entry(&conn, &self.entity_type, id)?
        };
        self.db.in_flight()?.remove(&flight_key(&self.entity_type, id));
        Ok(removed > 0)
    }

    /// Records a failed attempt and leaves the entry queued for retry.
    pub fn fail(&self, id: &RecordId, reason: &str) -> StorageResult<Option<QueueEntry>> {
        let updated = {
            let conn = self.db.lock()?;
            match database::load_entry(&conn, &self.entity_type, id)? {
                Some(mut entry) => {
                    entry.attempts = entry.attempts.saturating_add(1);
                    entry.last_attempt_at = Some(Utc::now());
                    entry.last_error = Some(reason.to_string());
                    database::update_entry(&conn, &entry)?;
                    Some(entry)
                }
                None => None,
            }
        };
        self.db.in_flight()?.remove(&flight_key(&self.entity_type, id));
        if let Some(entry) = &updated {
            debug!("upload of {id} failed (attempt {}): {reason}", entry.attempts);
        }
        Ok(updated)
    }

    /// Clears the in-flight marker for an entry without touching it.
    pub fn release(&self, id: &RecordId) -> StorageResult<()> {
        self.db.in_flight()?.remove(&flight_key(&self.entity_type, id));
        Ok(())
    }

    /// Clears every in-flight marker held by this queue.
    pub fn release_all(&self) -> StorageResult<()> {
        self.db
            .in_flight()?
            .retain(|(entity_type, _)| *entity_type != self.entity_type);
        Ok(())
    }

    pub fn is_in_flight(&self, id: &RecordId) -> StorageResult<bool> {
        Ok(self.db.in_flight()?.contains(&flight_key(&self.entity_type, id)))
    }

    pub fn get(&self, id: &RecordId) -> StorageResult<Option<QueueEntry>> {
        let conn = self.db.lock()?;
        database::load_entry(&conn, &self.entity_type, id)
    }

    /// Snapshot of all queued entries in FIFO order.
    pub fn list_pending(&self) -> StorageResult<Vec<QueueEntry>> {
        let conn = self.db.lock()?;
        database::load_entries(&conn, &self.entity_type)
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.list_pending()?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

pub(crate) fn enqueue_in(
    conn: &Connection,
    in_flight: &HashSet<FlightKey>,
    mut entry: QueueEntry,
) -> StorageResult<EnqueueOutcome> {
    let Some(mut existing) = database::load_entry(conn, &entry.entity_type, &entry.record_id)?
    else {
        entry.seq = database::next_seq(conn)?;
        database::insert_entry(conn, &entry)?;
        debug!("queued {} for {}", entry.operation, entry.record_id);
        return Ok(EnqueueOutcome::Appended);
    };

    match coalesce(&existing, &entry) {
        // An in-flight create may still land on the server; keep a delete
        // queued so the record is removed once its canonical id is known.
        Coalesced::Drop
            if in_flight.contains(&flight_key(&existing.entity_type, &existing.record_id)) =>
        {
            existing.operation = SyncOperation::Delete;
            existing.payload = serde_json::Value::Null;
            database::update_entry(conn, &existing)?;
            Ok(EnqueueOutcome::Coalesced)
        }
        Coalesced::Drop => {
            database::delete_entry(conn, &existing.entity_type, &existing.record_id)?;
            debug!("dropped queued create for {}", existing.record_id);
            Ok(EnqueueOutcome::Dropped)
        }
        Coalesced::Replace { operation, payload } => {
            existing.operation = operation;
            existing.payload = payload;
            database::update_entry(conn, &existing)?;
            debug!("coalesced {} into queued entry for {}", entry.operation, existing.record_id);
            Ok(EnqueueOutcome::Coalesced)
        }
    }
}
