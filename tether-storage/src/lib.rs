//! DuckDB storage layer for Tether.
//!
//! Provides durable local state for the sync engine:
//! - [`LocalRecordStore`]: records created offline plus cached canonical records
//! - [`SyncQueue`]: ordered backlog of mutations awaiting upload
//!
//! # Architecture
//!
//! Both tables live in a single DuckDB file behind one connection, so a rekey
//! (record row + queue row) commits as one transaction. Every write commits
//! before returning; nothing is buffered in memory except the set of queue
//! entries currently being uploaded, which is meaningless after a restart.

mod database;
mod error;
mod record_store;
mod sync_queue;

pub use database::LocalDatabase;
pub use error::{StorageError, StorageResult};
pub use record_store::LocalRecordStore;
pub use sync_queue::{EnqueueOutcome, SyncQueue};

/// Open a DuckDB connection with resource limits applied.
///
/// A stale `.wal` file next to the database is reported but never removed:
/// it may hold committed provisional records that have not been checkpointed.
pub fn open_duckdb(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(e) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                tracing::error!(
                    "DuckDB open failed with WAL present at {}: {e}",
                    wal_path.display()
                );
                return Err(StorageError::Unavailable(format!(
                    "cannot open {} (WAL present, refusing to discard it): {e}",
                    path.display()
                )));
            }
            return Err(e.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Apply memory and thread limits to a DuckDB connection.
fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}
