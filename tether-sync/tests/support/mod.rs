#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_cloud::{CloudGateway, GatewayError, GatewayResult, ListFilter};
use tether_storage::{LocalDatabase, LocalRecordStore, SyncQueue};
use tether_sync::{
    BackoffPolicy, ConnectivityMonitor, MonitoredGateway, ProjectIntegrationFacade,
    ReconciliationEngine, SyncConfig,
};
use tether_types::{CanonicalRecord, QueueEntry, Record, SyncOperation, merge_patch};

// ── Stub Gateway ────────────────────────────────────────────────

/// A gateway call, captured for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(serde_json::Value),
    Get(String),
    List,
    Update(String, serde_json::Value),
    Delete(String),
}

/// Scripted failure for the next call.
#[derive(Debug, Clone)]
pub enum Failure {
    Network,
    Rejected(String),
    Conflict,
    Unauthorized,
}

impl Failure {
    fn into_error(self) -> GatewayError {
        match self {
            Failure::Network => GatewayError::Network("connection reset".into()),
            Failure::Rejected(msg) => GatewayError::Rejected(msg),
            Failure::Conflict => GatewayError::Conflict("stale".into()),
            Failure::Unauthorized => GatewayError::Unauthorized("token expired".into()),
        }
    }
}

#[derive(Default)]
struct StubState {
    records: BTreeMap<String, CanonicalRecord>,
    next_id: u64,
    calls: Vec<Call>,
    failures: VecDeque<Failure>,
    rejected_names: HashSet<String>,
    delay: Option<Duration>,
    id_prefix: Option<String>,
}

/// In-memory cloud store. Assigns ids `srv-1`, `srv-2`, ...
#[derive(Default)]
pub struct StubGateway {
    state: Mutex<StubState>,
}

impl StubGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// `name` attributes of create calls, in call order.
    pub fn created_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(payload) => payload["name"].as_str().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    pub fn fail_next(&self, failure: Failure) {
        self.state.lock().unwrap().failures.push_back(failure);
    }

    /// Creates whose `name` equals `name` are rejected permanently.
    pub fn reject_name(&self, name: &str) {
        self.state.lock().unwrap().rejected_names.insert(name.to_string());
    }

    /// Assigns ids `{prefix}1`, `{prefix}2`, ... instead of `srv-N`.
    pub fn set_id_prefix(&self, prefix: &str) {
        self.state.lock().unwrap().id_prefix = Some(prefix.to_string());
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn seed(&self, id: &str, attributes: serde_json::Value) {
        let now = Utc::now();
        self.state.lock().unwrap().records.insert(
            id.to_string(),
            CanonicalRecord {
                id: id.to_string(),
                attributes,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn record(&self, id: &str) -> Option<CanonicalRecord> {
        self.state.lock().unwrap().records.get(id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    /// Records the call and returns the scripted failure, if any.
    async fn enter(&self, call: Call) -> GatewayResult<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state.lock().unwrap().failures.pop_front() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudGateway for StubGateway {
    async fn create(
        &self,
        _entity_type: &str,
        payload: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        self.enter(Call::Create(payload.clone())).await?;
        let mut state = self.state.lock().unwrap();
        if let Some(name) = payload["name"].as_str() {
            if state.rejected_names.contains(name) {
                return Err(GatewayError::Rejected(format!("name {name:?} not allowed")));
            }
        }
        state.next_id += 1;
        let now = Utc::now();
        let prefix = state.id_prefix.as_deref().unwrap_or("srv-");
        let record = CanonicalRecord {
            id: format!("{prefix}{}", state.next_id),
            attributes: payload.clone(),
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, _entity_type: &str, id: &str) -> GatewayResult<Option<CanonicalRecord>> {
        self.enter(Call::Get(id.to_string())).await?;
        Ok(self.record(id))
    }

    async fn list(
        &self,
        _entity_type: &str,
        _filter: &ListFilter,
    ) -> GatewayResult<Vec<CanonicalRecord>> {
        self.enter(Call::List).await?;
        Ok(self.state.lock().unwrap().records.values().cloned().collect())
    }

    async fn update(
        &self,
        _entity_type: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        self.enter(Call::Update(id.to_string(), patch.clone())).await?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        merge_patch(&mut record.attributes, patch);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete(&self, _entity_type: &str, id: &str) -> GatewayResult<()> {
        self.enter(Call::Delete(id.to_string())).await?;
        self.state
            .lock()
            .unwrap()
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }
}

// ── Engine Harness ──────────────────────────────────────────────

pub struct Harness {
    pub db: LocalDatabase,
    pub store: LocalRecordStore,
    pub queue: SyncQueue,
    pub stub: Arc<StubGateway>,
    pub monitor: ConnectivityMonitor,
    pub engine: Arc<ReconciliationEngine>,
}

pub fn harness(online: bool) -> Harness {
    harness_with(online, Duration::from_secs(5))
}

pub fn harness_with(online: bool, call_timeout: Duration) -> Harness {
    let db = LocalDatabase::open_in_memory().unwrap();
    let store = db.record_store("project");
    let queue = db.sync_queue("project");
    let stub = StubGateway::new();
    let monitor = ConnectivityMonitor::new(online);
    let gateway = Arc::new(MonitoredGateway::new(stub.clone(), monitor.clone(), call_timeout));
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        queue.clone(),
        gateway,
        monitor.clone(),
        BackoffPolicy::default(),
    ));
    Harness {
        db,
        store,
        queue,
        stub,
        monitor,
        engine,
    }
}

impl Harness {
    /// Writes a provisional record and its create entry, as an offline create would.
    pub fn queue_create(&self, name: &str) -> Record {
        let record = Record::provisional("project", serde_json::json!({ "name": name }));
        let entry = QueueEntry::new(
            record.id.clone(),
            "project",
            SyncOperation::Create,
            record.attributes.clone(),
        );
        self.store.put_pending(&record, entry).unwrap();
        record
    }
}

// ── Facade Helpers ──────────────────────────────────────────────

/// Routes `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with the retry tick disabled so tests control every pass.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        call_timeout_ms: 2_000,
        retry_interval_secs: 0,
        ..SyncConfig::default()
    }
}

pub async fn facade(
    stub: &Arc<StubGateway>,
    monitor: &ConnectivityMonitor,
) -> ProjectIntegrationFacade {
    init_tracing();
    ProjectIntegrationFacade::init(test_config(), stub.clone(), monitor.clone())
        .await
        .unwrap()
}

/// Polls until the queue is empty, failing after two seconds.
pub async fn wait_until_drained(facade: &ProjectIntegrationFacade) {
    for _ in 0..200 {
        let status = facade.status().unwrap();
        if status.pending_count == 0 && !status.is_syncing {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not drain: {:?}", facade.status().unwrap());
}
