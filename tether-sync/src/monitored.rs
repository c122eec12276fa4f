//! Gateway wrapper that bounds every call and feeds its outcome back into the
//! connectivity signal.
//!
//! Every record a gateway returns passes [`check_canonical`] here, whatever
//! the implementation behind it, so a provisional-looking id never reaches
//! local storage as settled.

use crate::connectivity::ConnectivityMonitor;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tether_cloud::{CloudGateway, GatewayError, GatewayResult, ListFilter, check_canonical};
use tether_types::CanonicalRecord;

pub struct MonitoredGateway {
    inner: Arc<dyn CloudGateway>,
    monitor: ConnectivityMonitor,
    timeout: Duration,
}

impl MonitoredGateway {
    pub fn new(inner: Arc<dyn CloudGateway>, monitor: ConnectivityMonitor, timeout: Duration) -> Self {
        Self {
            inner,
            monitor,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn guard<T>(
        &self,
        what: &str,
        call: impl Future<Output = GatewayResult<T>> + Send,
    ) -> GatewayResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => {
                // The server answered, so the link works again.
                if self.monitor.is_degraded() {
                    self.monitor.report_recovered();
                }
                Ok(value)
            }
            Ok(Err(e)) => {
                if e.is_transient() {
                    self.monitor.report_network_failure();
                }
                Err(e)
            }
            Err(_) => {
                self.monitor.report_network_failure();
                Err(GatewayError::Timeout(format!("{what} after {:?}", self.timeout)))
            }
        }
    }
}

#[async_trait]
impl CloudGateway for MonitoredGateway {
    async fn create(
        &self,
        entity_type: &str,
        payload: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        self.guard("create", self.inner.create(entity_type, payload))
            .await
            .and_then(check_canonical)
    }

    async fn get(&self, entity_type: &str, id: &str) -> GatewayResult<Option<CanonicalRecord>> {
        self.guard("get", self.inner.get(entity_type, id))
            .await?
            .map(check_canonical)
            .transpose()
    }

    async fn list(
        &self,
        entity_type: &str,
        filter: &ListFilter,
    ) -> GatewayResult<Vec<CanonicalRecord>> {
        self.guard("list", self.inner.list(entity_type, filter))
            .await?
            .into_iter()
            .map(check_canonical)
            .collect()
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        self.guard("update", self.inner.update(entity_type, id, patch))
            .await
            .and_then(check_canonical)
    }

    async fn delete(&self, entity_type: &str, id: &str) -> GatewayResult<()> {
        self.guard("delete", self.inner.delete(entity_type, id)).await
    }
}
