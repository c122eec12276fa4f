//! The seam between the sync engine and the authoritative record store.

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_types::{CanonicalRecord, RecordId};

/// Server-side filter for [`CloudGateway::list`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_since: Option<DateTime<Utc>>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }
}

/// Refuses a server record whose id is empty or carries the provisional prefix.
pub fn check_canonical(record: CanonicalRecord) -> GatewayResult<CanonicalRecord> {
    if let Err(e) = RecordId::canonical(record.id.as_str()) {
        return Err(GatewayError::Rejected(format!("server returned unusable id: {e}")));
    }
    Ok(record)
}

/// Remote record store. The only component allowed to talk to the cloud.
///
/// Implementations must be cheap to share across tasks; the sync engine holds
/// them behind an `Arc`.
#[async_trait]
pub trait CloudGateway: Send + Sync {
    /// Creates a record and returns it with its server-assigned id.
    async fn create(
        &self,
        entity_type: &str,
        payload: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord>;

    /// Fetches a record by canonical id. `Ok(None)` when the server has no such record.
    async fn get(&self, entity_type: &str, id: &str) -> GatewayResult<Option<CanonicalRecord>>;

    async fn list(&self, entity_type: &str, filter: &ListFilter)
    -> GatewayResult<Vec<CanonicalRecord>>;

    /// Applies a partial update and returns the updated record.
    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord>;

    async fn delete(&self, entity_type: &str, id: &str) -> GatewayResult<()>;
}

#[async_trait]
impl<G: CloudGateway + ?Sized> CloudGateway for Arc<G> {
    async fn create(
        &self,
        entity_type: &str,
        payload: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        (**self).create(entity_type, payload).await
    }

    async fn get(&self, entity_type: &str, id: &str) -> GatewayResult<Option<CanonicalRecord>> {
        (**self).get(entity_type, id).await
    }

    async fn list(
        &self,
        entity_type: &str,
        filter: &ListFilter,
    ) -> GatewayResult<Vec<CanonicalRecord>> {
        (**self).list(entity_type, filter).await
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        (**self).update(entity_type, id, patch).await
    }

    async fn delete(&self, entity_type: &str, id: &str) -> GatewayResult<()> {
        (**self).delete(entity_type, id).await
    }
}
