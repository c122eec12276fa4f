//! Single entry point for project operations.
//!
//! Each call decides between the cloud and the local store:
//! - online, and the record is canonical: talk to the gateway, cache the result;
//! - offline, or the record only exists locally: write the local record and
//!   its queue entry in one transaction, and let the engine upload it later.
//!
//! A transient gateway failure on the online path falls back to the offline
//! path within the same call; the gateway wrapper has already flipped the
//! connectivity signal, so subsequent calls go straight to the local store.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::driver::{SyncDriverHandle, create_sync_driver};
use crate::engine::ReconciliationEngine;
use crate::error::{SyncError, SyncResult};
use crate::monitored::MonitoredGateway;
use crate::repair::{RepairReport, repair_orphans};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tether_cloud::{CloudGateway, GatewayError, ListFilter};
use tether_storage::{LocalDatabase, LocalRecordStore, SyncQueue};
use tether_types::{
    QueueEntry, Record, RecordFilter, RecordId, SyncOperation, SyncStatus, merge_patch,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ProjectIntegrationFacade {
    entity_type: String,
    store: LocalRecordStore,
    queue: SyncQueue,
    gateway: Arc<MonitoredGateway>,
    monitor: ConnectivityMonitor,
    engine: Arc<ReconciliationEngine>,
    driver: Mutex<Option<(SyncDriverHandle, JoinHandle<()>)>>,
    repair_report: RepairReport,
    disposed: AtomicBool,
}

impl ProjectIntegrationFacade {
    /// Opens the local database named by `config` and starts the subsystem.
    pub async fn init(
        config: SyncConfig,
        gateway: Arc<dyn CloudGateway>,
        monitor: ConnectivityMonitor,
    ) -> SyncResult<Self> {
        config.validate()?;
        let db = match &config.db_path {
            Some(path) => LocalDatabase::open_with_limits(path, &config.memory_limit, config.db_threads)?,
            None => LocalDatabase::open_in_memory()?,
        };
        Self::init_with_database(config, db, gateway, monitor).await
    }

    /// Starts the subsystem on an already opened database.
    ///
    /// Runs startup repair, then spawns the driver loop, which performs an
    /// initial pass when the monitor starts online.
    pub async fn init_with_database(
        config: SyncConfig,
        db: LocalDatabase,
        gateway: Arc<dyn CloudGateway>,
        monitor: ConnectivityMonitor,
    ) -> SyncResult<Self> {
        config.validate()?;
        let entity_type = config.entity_type.clone();
        let store = db.record_store(entity_type.clone());
        let queue = db.sync_queue(entity_type.clone());
        let gateway = Arc::new(MonitoredGateway::new(
            gateway,
            monitor.clone(),
            config.call_timeout(),
        ));

        let repair_report = repair_orphans(&store, &queue, gateway.as_ref(), &monitor).await?;

        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            queue.clone(),
            gateway.clone(),
            monitor.clone(),
            config.backoff(),
        ));
        let (handle, driver) = create_sync_driver(engine.clone(), monitor.clone(), config.retry_interval());
        let task = tokio::spawn(driver.run());

        info!(
            "[SYNC] {entity_type} sync initialized ({} pending)",
            queue.len()?
        );
        Ok(Self {
            entity_type,
            store,
            queue,
            gateway,
            monitor,
            engine,
            driver: Mutex::new(Some((handle, task))),
            repair_report,
            disposed: AtomicBool::new(false),
        })
    }

    /// Stops the driver loop. Further calls fail with [`SyncError::Disposed`].
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((handle, task)) = driver {
            if handle.stop().await.is_err() {
                task.abort();
            }
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("[SYNC] driver task ended abnormally: {e}");
                }
            }
        }
        info!("[SYNC] {} sync disposed", self.entity_type);
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// What startup repair changed.
    pub fn repair_report(&self) -> &RepairReport {
        &self.repair_report
    }

    /// Handle to the background driver, while the facade is live.
    pub fn driver_handle(&self) -> Option<SyncDriverHandle> {
        self.driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(handle, _)| handle.clone())
    }

    fn ensure_active(&self) -> SyncResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    fn entry(&self, id: &RecordId, op: SyncOperation, payload: serde_json::Value) -> QueueEntry {
        QueueEntry::new(id.clone(), self.entity_type.clone(), op, payload)
    }

    // ── Create ───────────────────────────────────────────────────

    pub async fn create_project(&self, attributes: serde_json::Value) -> SyncResult<Record> {
        self.ensure_active()?;

        if self.monitor.is_online() {
            match self.gateway.create(&self.entity_type, &attributes).await {
                Ok(canonical) => {
                    let record = Record::from_canonical(self.entity_type.clone(), canonical);
                    self.store.put(&record)?;
                    debug!("[SYNC] created {} online", record.id);
                    return Ok(record);
                }
                Err(e) if e.is_transient() => {
                    warn!("[SYNC] online create failed, queueing locally: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let record = Record::provisional(self.entity_type.clone(), attributes.clone());
        self.store
            .put_pending(&record, self.entry(&record.id, SyncOperation::Create, attributes))?;
        debug!("[SYNC] created {} offline", record.id);
        Ok(record)
    }

    // ── Read ─────────────────────────────────────────────────────

    /// Local copy first; a canonical id missing locally is fetched and cached
    /// when online.
    pub async fn get_project(&self, id: &str) -> SyncResult<Option<Record>> {
        self.ensure_active()?;
        let id = RecordId::parse(id);
        if let Some(record) = self.store.get(&id)? {
            return Ok(Some(record));
        }
        let RecordId::Canonical(raw) = &id else {
            return Ok(None);
        };
        if !self.monitor.is_online() {
            return Ok(None);
        }
        match self.gateway.get(&self.entity_type, raw).await {
            Ok(Some(canonical)) => {
                let record = Record::from_canonical(self.entity_type.clone(), canonical);
                self.store.put(&record)?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_transient() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Local records, refreshed from the server when online.
    ///
    /// Server copies overwrite cached ones except where the local record has
    /// unsent changes or a recorded failure.
    pub async fn list_projects(&self) -> SyncResult<Vec<Record>> {
        self.ensure_active()?;
        if self.monitor.is_online() {
            match self.gateway.list(&self.entity_type, &ListFilter::all()).await {
                Ok(remote) => self.cache_remote(remote)?,
                Err(e) if e.is_transient() => {
                    debug!("[SYNC] list refresh skipped: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.store.list(RecordFilter::all())?)
    }

    fn cache_remote(&self, remote: Vec<tether_types::CanonicalRecord>) -> SyncResult<()> {
        for canonical in remote {
            let record = Record::from_canonical(self.entity_type.clone(), canonical);
            let keep_local = self
                .store
                .get(&record.id)?
                .is_some_and(|local| local.pending_sync || local.error_state.is_some());
            if !keep_local {
                self.store.put(&record)?;
            }
        }
        Ok(())
    }

    pub async fn list_pending_sync_records(&self) -> SyncResult<Vec<Record>> {
        self.ensure_active()?;
        Ok(self.store.list(RecordFilter::pending())?)
    }

    // ── Update ───────────────────────────────────────────────────

    /// Applies a JSON merge patch to a record.
    pub async fn update_project(&self, id: &str, patch: serde_json::Value) -> SyncResult<Record> {
        self.ensure_active()?;
        let id = RecordId::parse(id);
        let local = self.store.get(&id)?;

        // Records with unsent changes stay on the queue so ordering holds.
        let settled = local.as_ref().is_none_or(|r| !r.pending_sync);
        if let RecordId::Canonical(raw) = &id {
            if settled && self.monitor.is_online() {
                match self.gateway.update(&self.entity_type, raw, &patch).await {
                    Ok(canonical) => {
                        let record = Record::from_canonical(self.entity_type.clone(), canonical);
                        self.store.put(&record)?;
                        return Ok(record);
                    }
                    Err(e) if e.is_transient() => {
                        warn!("[SYNC] online update of {id} failed, queueing locally: {e}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let mut record = local.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        let was_failed = record.error_state.is_some();
        let queued = self.queue.get(&id)?.is_some();

        merge_patch(&mut record.attributes, &patch);
        record.updated_at = Utc::now();
        record.pending_sync = true;
        record.error_state = None;

        let entry = match (&record.id, queued) {
            // A provisional record with nothing queued never reached the server.
            (RecordId::Provisional(_), false) => {
                self.entry(&record.id, SyncOperation::Create, record.attributes.clone())
            }
            // A failed update lost its payload; resend the full record.
            (RecordId::Canonical(_), false) if was_failed => {
                self.entry(&record.id, SyncOperation::Update, record.attributes.clone())
            }
            _ => self.entry(&record.id, SyncOperation::Update, patch),
        };
        self.store.put_pending(&record, entry)?;
        debug!("[SYNC] queued update for {}", record.id);
        Ok(record)
    }

    // ── Delete ───────────────────────────────────────────────────

    pub async fn delete_project(&self, id: &str) -> SyncResult<()> {
        self.ensure_active()?;
        let id = RecordId::parse(id);

        if let RecordId::Canonical(raw) = &id {
            if self.monitor.is_online() && self.queue.get(&id)?.is_none() {
                match self.gateway.delete(&self.entity_type, raw).await {
                    Ok(()) | Err(GatewayError::NotFound(_)) => {
                        self.store.discard(&id)?;
                        return Ok(());
                    }
                    Err(e) if e.is_transient() => {
                        warn!("[SYNC] online delete of {id} failed, queueing locally: {e}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        } else if self.queue.get(&id)?.is_none() {
            // Provisional and nothing queued: the server never saw it.
            self.store.discard(&id)?;
            return Ok(());
        }

        let entry = self.entry(&id, SyncOperation::Delete, serde_json::Value::Null);
        self.store.remove_pending(&id, entry)?;
        debug!("[SYNC] queued delete for {id}");
        Ok(())
    }

    // ── Sync ─────────────────────────────────────────────────────

    /// Drains the queue now, ignoring backoff. True iff nothing is left pending.
    pub async fn force_sync_now(&self) -> SyncResult<bool> {
        self.ensure_active()?;
        self.engine.force_sync_now().await
    }

    pub fn status(&self) -> SyncResult<SyncStatus> {
        let failed_count = self
            .store
            .list(RecordFilter::settled())?
            .iter()
            .filter(|r| r.error_state.is_some())
            .count();
        Ok(SyncStatus {
            is_online: self.monitor.is_online(),
            is_syncing: self.engine.is_syncing(),
            pending_count: self.queue.len()?,
            failed_count,
            last_sync_at: self.engine.last_sync_at(),
            last_report: self.engine.last_report(),
        })
    }
}

impl Drop for ProjectIntegrationFacade {
    fn drop(&mut self) {
        let driver = self.driver.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((_, task)) = driver {
            task.abort();
        }
    }
}
