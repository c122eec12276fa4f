//! Drains the sync queue against the cloud gateway.
//!
//! One pass takes entries oldest-first, uploads each one, and applies the
//! outcome locally:
//! - success: the record is rekeyed to its canonical id and settled, in the
//!   same transaction that acknowledges the queue entry;
//! - transient failure: the attempt is recorded and the pass stops, so later
//!   entries never overtake an earlier one;
//! - permanent failure: the record is flagged with an [`ErrorState`] and the
//!   pass moves on.
//!
//! Passes are single-flight. A caller that arrives while a pass is running
//! waits for it and receives its report instead of starting a second one.
//!
//! A forced pass ignores backoff and retests a link that is only degraded by
//! an earlier gateway failure; it is skipped only when the platform itself
//! reports offline.

use crate::backoff::BackoffPolicy;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tether_cloud::{CloudGateway, GatewayError};
use tether_storage::{LocalRecordStore, StorageError, SyncQueue};
use tether_types::{ErrorKind, ErrorState, QueueEntry, RecordId, SyncOperation, SyncReport};
use tracing::{debug, info, warn};

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Connectivity came back or the retry tick fired. Honors backoff.
    Automatic,
    /// Explicit caller request. Ignores backoff.
    Forced,
}

#[derive(Default)]
struct PassHistory {
    last_report: Option<SyncReport>,
    last_trigger: Option<Trigger>,
    last_sync_at: Option<DateTime<Utc>>,
}

/// Outcome of uploading a single entry.
enum Applied {
    Reconciled,
    Failed,
    Deferred,
}

pub struct ReconciliationEngine {
    store: LocalRecordStore,
    queue: SyncQueue,
    gateway: Arc<dyn CloudGateway>,
    monitor: ConnectivityMonitor,
    backoff: BackoffPolicy,
    run_lock: tokio::sync::Mutex<()>,
    /// Bumped after every completed pass; joiners compare against it.
    generation: AtomicU64,
    syncing: AtomicBool,
    history: Mutex<PassHistory>,
}

impl ReconciliationEngine {
    pub fn new(
        store: LocalRecordStore,
        queue: SyncQueue,
        gateway: Arc<dyn CloudGateway>,
        monitor: ConnectivityMonitor,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            gateway,
            monitor,
            backoff,
            run_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            syncing: AtomicBool::new(false),
            history: Mutex::new(PassHistory::default()),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.history().last_report.clone()
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.history().last_sync_at
    }

    fn history(&self) -> std::sync::MutexGuard<'_, PassHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a pass, or joins the one already in progress.
    pub async fn run(&self, trigger: Trigger) -> SyncResult<SyncReport> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("[SYNC] pass already running, joining");
                let guard = self.run_lock.lock().await;
                if self.generation.load(Ordering::SeqCst) > observed {
                    // A forced caller does not settle for a pass that honored backoff.
                    let history = self.history();
                    let covers = trigger == Trigger::Automatic
                        || history.last_trigger == Some(Trigger::Forced);
                    if let (true, Some(report)) = (covers, history.last_report.clone()) {
                        return Ok(report);
                    }
                }
                guard
            }
        };

        self.syncing.store(true, Ordering::SeqCst);
        let result = self.drain(trigger).await;
        self.syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(report) => {
                {
                    let mut history = self.history();
                    history.last_report = Some(report.clone());
                    history.last_trigger = Some(trigger);
                    if !report.skipped_offline {
                        history.last_sync_at = Some(Utc::now());
                    }
                }
                self.generation.fetch_add(1, Ordering::SeqCst);
                Ok(report)
            }
            Err(e) => {
                if let Err(release) = self.queue.release_all() {
                    warn!("[SYNC] failed to release in-flight entries: {release}");
                }
                Err(e)
            }
        }
    }

    /// Forced pass. True iff the queue ended empty.
    pub async fn force_sync_now(&self) -> SyncResult<bool> {
        Ok(self.run(Trigger::Forced).await?.is_drained())
    }

    async fn drain(&self, trigger: Trigger) -> SyncResult<SyncReport> {
        // A forced pass is the caller asking to retry now. If only a failed
        // call marked the link down, lift that and let the head entry test it.
        if trigger == Trigger::Forced
            && self.monitor.is_degraded()
            && self.monitor.is_platform_online()
        {
            debug!("[SYNC] forced pass retesting degraded link");
            self.monitor.report_recovered();
        }

        if !self.monitor.is_online() {
            let pending = self.queue.len()?;
            debug!("[SYNC] offline, skipping pass ({pending} pending)");
            return Ok(SyncReport::offline(pending));
        }

        let mut report = SyncReport::default();
        loop {
            if !self.monitor.is_online() {
                report.interrupted = true;
                break;
            }
            let Some(entry) = self.queue.dequeue_next()? else {
                break;
            };
            if trigger == Trigger::Automatic && !self.backoff.is_ready(&entry, Utc::now()) {
                debug!(
                    "[SYNC] {} backing off until {}",
                    entry.record_id,
                    self.backoff.next_attempt_at(&entry)
                );
                self.queue.release(&entry.record_id)?;
                report.interrupted = true;
                break;
            }

            report.processed += 1;
            match self.apply(&entry).await? {
                Applied::Reconciled => report.reconciled += 1,
                Applied::Failed => report.failed += 1,
                Applied::Deferred => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        report.pending = self.queue.len()?;
        if report.processed > 0 {
            info!(
                "[SYNC] pass done: {} reconciled, {} failed, {} pending",
                report.reconciled, report.failed, report.pending
            );
        }
        Ok(report)
    }

    async fn apply(&self, entry: &QueueEntry) -> SyncResult<Applied> {
        match self.upload(entry).await {
            Ok(()) => Ok(Applied::Reconciled),
            Err(SyncError::Gateway(e)) if e.is_transient() => {
                warn!("[SYNC] upload of {} deferred: {e}", entry.record_id);
                self.queue.fail(&entry.record_id, &e.to_string())?;
                Ok(Applied::Deferred)
            }
            Err(SyncError::Gateway(e)) => {
                let kind = e.error_kind().unwrap_or(ErrorKind::Rejected);
                self.fail_permanently(entry, kind, e.to_string())?;
                Ok(Applied::Failed)
            }
            Err(SyncError::Rekey { id, reason }) => {
                self.fail_permanently(entry, ErrorKind::Rejected, format!("rekey of {id}: {reason}"))?;
                Ok(Applied::Failed)
            }
            Err(e) => Err(e),
        }
    }

    fn fail_permanently(&self, entry: &QueueEntry, kind: ErrorKind, message: String) -> SyncResult<()> {
        warn!("[SYNC] {} {} failed permanently: {message}", entry.operation, entry.record_id);
        self.store
            .mark_failed(&entry.record_id, ErrorState::new(kind, message))?;
        Ok(())
    }

    async fn upload(&self, entry: &QueueEntry) -> SyncResult<()> {
        let entity_type = entry.entity_type.as_str();
        let canonical = match (entry.operation, &entry.record_id) {
            (SyncOperation::Create, _) => {
                self.gateway.create(entity_type, &entry.payload).await?
            }
            // A provisional record that never reached the server has to be
            // created in full, whatever the queued operation says.
            (SyncOperation::Update, RecordId::Provisional(_)) => {
                let body = match self.store.get(&entry.record_id)? {
                    Some(record) => record.attributes,
                    None => entry.payload.clone(),
                };
                self.gateway.create(entity_type, &body).await?
            }
            (SyncOperation::Update, RecordId::Canonical(id)) => {
                self.gateway.update(entity_type, id, &entry.payload).await?
            }
            (SyncOperation::Delete, RecordId::Provisional(_)) => {
                self.queue.ack(&entry.record_id)?;
                return Ok(());
            }
            (SyncOperation::Delete, RecordId::Canonical(id)) => {
                match self.gateway.delete(entity_type, id).await {
                    Ok(()) => {}
                    Err(GatewayError::NotFound(_)) => {
                        debug!("[SYNC] {id} already gone on server");
                    }
                    Err(e) => return Err(e.into()),
                }
                self.queue.ack(&entry.record_id)?;
                return Ok(());
            }
        };

        match self.store.reconcile(entry, &canonical) {
            Ok(_) => Ok(()),
            Err(StorageError::InvalidRekey(reason)) => Err(SyncError::Rekey {
                id: entry.record_id.to_string(),
                reason,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
