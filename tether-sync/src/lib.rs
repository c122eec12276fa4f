//! Offline-first synchronization for Tether.
//!
//! Records created or edited while the cloud is unreachable are written to the
//! local store with a provisional id and queued. When connectivity returns, the
//! [`ReconciliationEngine`] uploads the queue in order and rewrites each
//! provisional record to the id the server assigned.
//!
//! Callers use [`ProjectIntegrationFacade`]; the other types are exposed for
//! embedding and testing.

pub mod backoff;
pub mod config;
pub mod connectivity;
pub mod driver;
pub mod engine;
pub mod error;
pub mod facade;
pub mod monitored;
pub mod repair;

pub use backoff::BackoffPolicy;
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, Subscription};
pub use driver::{DriverCommand, SyncDriver, SyncDriverHandle, create_sync_driver};
pub use engine::{ReconciliationEngine, Trigger};
pub use error::{SyncError, SyncResult};
pub use facade::ProjectIntegrationFacade;
pub use monitored::MonitoredGateway;
pub use repair::{RepairReport, repair_orphans};
