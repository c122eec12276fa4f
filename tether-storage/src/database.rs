//! Shared DuckDB handle, schema, and row codecs.

use crate::error::{StorageError, StorageResult};
use crate::{LocalRecordStore, SyncQueue};
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tether_types::{ErrorState, QueueEntry, Record, RecordId, SyncOperation};

/// In-flight marker key: `(entity_type, record_id)`.
pub(crate) type FlightKey = (String, String);

pub(crate) fn flight_key(entity_type: &str, id: &RecordId) -> FlightKey {
    (entity_type.to_string(), id.as_str().to_string())
}

/// Durable local state shared by the record store and the sync queue.
///
/// Cloning is cheap; clones share the connection and the in-flight set.
#[derive(Clone)]
pub struct LocalDatabase {
    conn: Arc<Mutex<Connection>>,
    /// Queue entries currently being uploaded, per entity type.
    in_flight: Arc<Mutex<HashSet<FlightKey>>>,
}

impl LocalDatabase {
    /// Opens or creates a database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_limits(path, "128MB", 1)
    }

    /// Opens or creates a database with explicit DuckDB resource limits.
    pub fn open_with_limits(path: &Path, memory_limit: &str, threads: u32) -> StorageResult<Self> {
        let conn = crate::open_duckdb(path, memory_limit, threads)?;
        initialize_schema(&conn)?;
        tracing::debug!("opened local database at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Record store scoped to one entity type.
    pub fn record_store(&self, entity_type: impl Into<String>) -> LocalRecordStore {
        LocalRecordStore::new(self.clone(), entity_type.into())
    }

    /// Sync queue scoped to one entity type.
    pub fn sync_queue(&self, entity_type: impl Into<String>) -> SyncQueue {
        SyncQueue::new(self.clone(), entity_type.into())
    }

    /// Forces the WAL into the main database file.
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.lock()?.execute_batch("CHECKPOINT;")?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".into()))
    }

    pub(crate) fn in_flight(&self) -> StorageResult<MutexGuard<'_, HashSet<FlightKey>>> {
        self.in_flight
            .lock()
            .map_err(|_| StorageError::Unavailable("in-flight lock poisoned".into()))
    }
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id VARCHAR NOT NULL,
            entity_type VARCHAR NOT NULL,
            attributes_json TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            pending_sync BOOLEAN NOT NULL,
            error_json TEXT,
            PRIMARY KEY (entity_type, id)
        );

        CREATE TABLE IF NOT EXISTS sync_queue (
            record_id VARCHAR NOT NULL,
            entity_type VARCHAR NOT NULL,
            operation VARCHAR NOT NULL,
            payload_json TEXT NOT NULL,
            attempts BIGINT NOT NULL DEFAULT 0,
            enqueued_at BIGINT NOT NULL,
            seq BIGINT NOT NULL,
            last_attempt_at BIGINT,
            last_error TEXT,
            PRIMARY KEY (entity_type, record_id)
        );
        "#,
    )?;
    Ok(())
}

// ── Timestamps ───────────────────────────────────────────────────

pub(crate) fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(id: &str, micros: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StorageError::Corrupt {
        id: id.to_string(),
        reason: format!("timestamp out of range: {micros}"),
    })
}

fn optional_row<T>(result: duckdb::Result<T>) -> StorageResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Records ──────────────────────────────────────────────────────

const RECORD_COLUMNS: &str =
    "id, entity_type, attributes_json, created_at, updated_at, pending_sync, error_json";

struct RawRecord {
    id: String,
    entity_type: String,
    attributes_json: String,
    created_at: i64,
    updated_at: i64,
    pending_sync: bool,
    error_json: Option<String>,
}

fn raw_record(row: &duckdb::Row<'_>) -> duckdb::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        attributes_json: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        pending_sync: row.get(5)?,
        error_json: row.get(6)?,
    })
}

fn decode_record(raw: RawRecord) -> StorageResult<Record> {
    let error_state: Option<ErrorState> = match raw.error_json.as_deref() {
        Some(json) => Some(serde_json::from_str(json)?),
        None => None,
    };
    Ok(Record {
        created_at: from_micros(&raw.id, raw.created_at)?,
        updated_at: from_micros(&raw.id, raw.updated_at)?,
        attributes: serde_json::from_str(&raw.attributes_json)?,
        id: RecordId::from(raw.id),
        entity_type: raw.entity_type,
        pending_sync: raw.pending_sync,
        error_state,
    })
}

pub(crate) fn load_record(
    conn: &Connection,
    entity_type: &str,
    id: &RecordId,
) -> StorageResult<Option<Record>> {
    let raw = optional_row(conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ? AND entity_type = ?"),
        params![id.as_str(), entity_type],
        raw_record,
    ))?;
    raw.map(decode_record).transpose()
}

pub(crate) fn load_records(
    conn: &Connection,
    entity_type: &str,
    pending_sync: Option<bool>,
) -> StorageResult<Vec<Record>> {
    let raws = match pending_sync {
        Some(flag) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ? AND pending_sync = ? \
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map(params![entity_type, flag], raw_record)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ? ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map(params![entity_type], raw_record)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    raws.into_iter().map(decode_record).collect()
}

pub(crate) fn upsert_record(conn: &Connection, record: &Record) -> StorageResult<()> {
    let attributes_json = serde_json::to_string(&record.attributes)?;
    let error_json = record
        .error_state
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        &format!("INSERT OR REPLACE INTO records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
        params![
            record.id.as_str(),
            record.entity_type,
            attributes_json,
            to_micros(&record.created_at),
            to_micros(&record.updated_at),
            record.pending_sync,
            error_json,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_record(
    conn: &Connection,
    entity_type: &str,
    id: &RecordId,
) -> StorageResult<usize> {
    Ok(conn.execute(
        "DELETE FROM records WHERE entity_type = ? AND id = ?",
        params![entity_type, id.as_str()],
    )?)
}

// ── Queue entries ────────────────────────────────────────────────

const QUEUE_COLUMNS: &str = "record_id, entity_type, operation, payload_json, attempts, \
                             enqueued_at, seq, last_attempt_at, last_error";

struct RawEntry {
    record_id: String,
    entity_type: String,
    operation: String,
    payload_json: String,
    attempts: i64,
    enqueued_at: i64,
    seq: i64,
    last_attempt_at: Option<i64>,
    last_error: Option<String>,
}

fn raw_entry(row: &duckdb::Row<'_>) -> duckdb::Result<RawEntry> {
    Ok(RawEntry {
        record_id: row.get(0)?,
        entity_type: row.get(1)?,
        operation: row.get(2)?,
        payload_json: row.get(3)?,
        attempts: row.get(4)?,
        enqueued_at: row.get(5)?,
        seq: row.get(6)?,
        last_attempt_at: row.get(7)?,
        last_error: row.get(8)?,
    })
}

fn decode_entry(raw: RawEntry) -> StorageResult<QueueEntry> {
    let operation: SyncOperation =
        raw.operation
            .parse()
            .map_err(|e: tether_types::UnknownOperation| StorageError::Corrupt {
                id: raw.record_id.clone(),
                reason: e.to_string(),
            })?;
    let last_attempt_at = raw
        .last_attempt_at
        .map(|m| from_micros(&raw.record_id, m))
        .transpose()?;
    Ok(QueueEntry {
        enqueued_at: from_micros(&raw.record_id, raw.enqueued_at)?,
        payload: serde_json::from_str(&raw.payload_json)?,
        attempts: u32::try_from(raw.attempts).map_err(|_| StorageError::Corrupt {
            id: raw.record_id.clone(),
            reason: format!("attempt count out of range: {}", raw.attempts),
        })?,
        record_id: RecordId::from(raw.record_id),
        entity_type: raw.entity_type,
        operation,
        seq: raw.seq,
        last_attempt_at,
        last_error: raw.last_error,
    })
}

pub(crate) fn load_entry(
    conn: &Connection,
    entity_type: &str,
    id: &RecordId,
) -> StorageResult<Option<QueueEntry>> {
    let raw = optional_row(conn.query_row(
        &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE record_id = ? AND entity_type = ?"),
        params![id.as_str(), entity_type],
        raw_entry,
    ))?;
    raw.map(decode_entry).transpose()
}

pub(crate) fn load_entries(conn: &Connection, entity_type: &str) -> StorageResult<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE entity_type = ? ORDER BY enqueued_at, seq"
    ))?;
    let raws = stmt
        .query_map(params![entity_type], raw_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(decode_entry).collect()
}

pub(crate) fn next_seq(conn: &Connection) -> StorageResult<i64> {
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue",
        [],
        |row| row.get(0),
    )?;
    Ok(seq)
}

pub(crate) fn insert_entry(conn: &Connection, entry: &QueueEntry) -> StorageResult<()> {
    let payload_json = serde_json::to_string(&entry.payload)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO sync_queue ({QUEUE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            entry.record_id.as_str(),
            entry.entity_type,
            entry.operation.as_str(),
            payload_json,
            i64::from(entry.attempts),
            to_micros(&entry.enqueued_at),
            entry.seq,
            entry.last_attempt_at.as_ref().map(to_micros),
            entry.last_error,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_entry(
    conn: &Connection,
    entity_type: &str,
    id: &RecordId,
) -> StorageResult<usize> {
    Ok(conn.execute(
        "DELETE FROM sync_queue WHERE entity_type = ? AND record_id = ?",
        params![entity_type, id.as_str()],
    )?)
}

/// Rewrites every column of an existing entry except its key.
pub(crate) fn update_entry(conn: &Connection, entry: &QueueEntry) -> StorageResult<usize> {
    let payload_json = serde_json::to_string(&entry.payload)?;
    Ok(conn.execute(
        "UPDATE sync_queue SET operation = ?, payload_json = ?, attempts = ?, enqueued_at = ?, \
         seq = ?, last_attempt_at = ?, last_error = ? WHERE entity_type = ? AND record_id = ?",
        params![
            entry.operation.as_str(),
            payload_json,
            i64::from(entry.attempts),
            to_micros(&entry.enqueued_at),
            entry.seq,
            entry.last_attempt_at.as_ref().map(to_micros),
            entry.last_error,
            entry.entity_type,
            entry.record_id.as_str(),
        ],
    )?)
}
