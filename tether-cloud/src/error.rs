//! Cloud gateway error types.

use tether_types::ErrorKind;
use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors returned by a [`CloudGateway`](crate::CloudGateway).
///
/// `Network` and `Timeout` are transient: the same call may succeed later.
/// Everything else is permanent for the payload that produced it.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("gateway call timed out: {0}")]
    Timeout(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Failure kind to record on a record that will not be retried.
    /// `None` for transient errors.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Network(_) | Self::Timeout(_) => None,
            Self::Unauthorized(_) => Some(ErrorKind::Unauthorized),
            Self::Conflict(_) => Some(ErrorKind::Conflict),
            Self::NotFound(_) => Some(ErrorKind::NotFound),
            Self::Rejected(_) | Self::Serialization(_) | Self::Config(_) => {
                Some(ErrorKind::Rejected)
            }
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_builder() {
            Self::Config(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
