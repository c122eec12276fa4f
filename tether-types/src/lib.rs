//! Core types for Tether.
//!
//! Shared by every layer of the sync engine:
//! - [`RecordId`]: provisional vs canonical identifiers
//! - [`Record`]: the synchronized entity and its sync flags
//! - [`QueueEntry`]: a pending local mutation
//! - [`SyncReport`] / [`SyncStatus`]: aggregate counters for callers

mod id;
mod queue;
mod record;
mod status;

pub use id::{IdError, PROVISIONAL_PREFIX, RecordId};
pub use queue::{Coalesced, QueueEntry, SyncOperation, UnknownOperation, coalesce};
pub use record::{CanonicalRecord, ErrorKind, ErrorState, Record, RecordState, merge_patch};
pub use status::{RecordFilter, SyncReport, SyncStatus};
