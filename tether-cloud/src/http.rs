//! JSON-over-HTTP client for the cloud record API.
//!
//! Routes, per entity type `t`:
//! - `POST   /api/{t}s`       create
//! - `GET    /api/{t}s/{id}`  get (404 maps to `None`)
//! - `GET    /api/{t}s`       list
//! - `PATCH  /api/{t}s/{id}`  update
//! - `DELETE /api/{t}s/{id}`  delete
//!
//! Non-success statuses are mapped onto [`GatewayError`] so the sync engine can
//! tell retryable failures from permanent ones.

use crate::config::CloudConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{CloudGateway, ListFilter, check_canonical};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use tether_types::CanonicalRecord;
use tokio::sync::RwLock;
use tracing::debug;

/// HTTP implementation of [`CloudGateway`].
#[derive(Clone)]
pub struct HttpCloudGateway {
    client: Client,
    base_url: Url,
    token: Arc<RwLock<Option<String>>>,
}

#[derive(Deserialize)]
struct ListResponse {
    items: Vec<CanonicalRecord>,
}

impl HttpCloudGateway {
    pub fn new(config: CloudConfig) -> GatewayResult<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| GatewayError::Config(format!("api_base_url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "api_base_url {} cannot carry a path",
                config.api_base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: Arc::new(RwLock::new(config.auth_token)),
        })
    }

    /// Replaces the bearer token used for subsequent requests.
    pub async fn set_auth_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn url(&self, entity_type: &str, id: Option<&str>) -> GatewayResult<Url> {
        let collection = format!("{entity_type}s");
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| GatewayError::Config("api_base_url cannot carry a path".into()))?;
            segments.pop_if_empty().extend(["api", collection.as_str()]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn send(&self, req: RequestBuilder) -> GatewayResult<Response> {
        let req = match self.token.read().await.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        Ok(req.send().await?)
    }
}

/// Passes successful responses through and classifies everything else.
async fn check(resp: Response, what: &str) -> GatewayResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    debug!("{what} returned {status}");
    Err(classify(status, what, body.trim()))
}

fn classify(status: StatusCode, what: &str, body: &str) -> GatewayError {
    let detail = if body.is_empty() {
        format!("{what}: {status}")
    } else {
        format!("{what}: {status}: {body}")
    };
    match status {
        s if s.is_server_error() => GatewayError::Network(detail),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            GatewayError::Network(detail)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(detail),
        StatusCode::CONFLICT => GatewayError::Conflict(detail),
        StatusCode::NOT_FOUND => GatewayError::NotFound(detail),
        _ => GatewayError::Rejected(detail),
    }
}

/// Server ids must never collide with the local provisional id space.
async fn decode_record(resp: Response) -> GatewayResult<CanonicalRecord> {
    let bytes = resp.bytes().await?;
    let record: CanonicalRecord = serde_json::from_slice(&bytes)?;
    check_canonical(record)
}

#[async_trait]
impl CloudGateway for HttpCloudGateway {
    async fn create(
        &self,
        entity_type: &str,
        payload: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        let url = self.url(entity_type, None)?;
        let resp = self.send(self.client.post(url).json(payload)).await?;
        let record = decode_record(check(resp, "create").await?).await?;
        debug!("created {entity_type} {}", record.id);
        Ok(record)
    }

    async fn get(&self, entity_type: &str, id: &str) -> GatewayResult<Option<CanonicalRecord>> {
        let url = self.url(entity_type, Some(id))?;
        let resp = self.send(self.client.get(url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = decode_record(check(resp, "get").await?).await?;
        Ok(Some(record))
    }

    async fn list(
        &self,
        entity_type: &str,
        filter: &ListFilter,
    ) -> GatewayResult<Vec<CanonicalRecord>> {
        let url = self.url(entity_type, None)?;
        let resp = self.send(self.client.get(url).query(filter)).await?;
        let bytes = check(resp, "list").await?.bytes().await?;
        let data: ListResponse = serde_json::from_slice(&bytes)?;
        data.items.into_iter().map(check_canonical).collect()
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> GatewayResult<CanonicalRecord> {
        let url = self.url(entity_type, Some(id))?;
        let resp = self.send(self.client.patch(url).json(patch)).await?;
        decode_record(check(resp, "update").await?).await
    }

    async fn delete(&self, entity_type: &str, id: &str) -> GatewayResult<()> {
        let url = self.url(entity_type, Some(id))?;
        let resp = self.send(self.client.delete(url)).await?;
        check(resp, "delete").await?;
        debug!("deleted {entity_type} {id}");
        Ok(())
    }
}
