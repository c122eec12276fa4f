//! Sync subsystem configuration.

use crate::backoff::BackoffPolicy;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`ProjectIntegrationFacade`](crate::ProjectIntegrationFacade).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entity type the facade manages; also the REST collection name stem.
    pub entity_type: String,
    /// DuckDB file. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// DuckDB memory limit, e.g. "128MB".
    pub memory_limit: String,
    pub db_threads: u32,
    /// Upper bound on a single gateway call.
    pub call_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Period of the automatic retry tick. 0 disables it.
    pub retry_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            entity_type: "project".to_string(),
            db_path: None,
            memory_limit: "128MB".to_string(),
            db_threads: 1,
            call_timeout_ms: 15_000,
            backoff_base_ms: 2_000,
            backoff_max_ms: 300_000,
            retry_interval_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Loads a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.entity_type.trim().is_empty() {
            return Err(SyncError::Config("entity_type must not be empty".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(SyncError::Config("call_timeout_ms must be positive".into()));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(SyncError::Config(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        (self.retry_interval_secs > 0).then(|| Duration::from_secs(self.retry_interval_secs))
    }
}
