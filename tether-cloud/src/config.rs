//! Cloud gateway configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`HttpCloudGateway`](crate::HttpCloudGateway).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Base URL of the cloud record API (e.g., "https://api.tether.dev").
    pub api_base_url: String,

    /// Bearer token sent with every request, if any.
    pub auth_token: Option<String>,

    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.tether.dev".to_string(),
            auth_token: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl CloudConfig {
    /// Config pointing at a local server, as used by integration tests.
    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: base_url.into(),
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
