//! Client Error Types
//!
//! Centralized error taxonomy for the transport, gateway and REST layers.
//!
//! The split mirrors how failures propagate: `TransportError` is transient and
//! handled by reconnect/retry machinery, `GatewayError` is fatal and surfaced
//! once to the connection owner, `ApiError` is returned to whoever issued the
//! REST call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure at the transport layer (websocket or HTTP round trip).
///
/// Transient by contract: the gateway reacts with a resume attempt, REST
/// callers decide for themselves whether to retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to establish connection: {0}")]
    Connect(String),

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("peer sent a malformed message: {0}")]
    Protocol(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Non-recoverable gateway failure, surfaced to the connection owner exactly
/// once. The reconnect loop stops after any of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication rejected during identify")]
    AuthenticationFailed,

    #[error("gateway closed with non-recoverable code {code}: {reason}")]
    FatalClose { code: u16, reason: String },

    /// The owner shut the connection down before it reached ready.
    #[error("connection closed before becoming ready")]
    Closed,
}

/// Error body returned by the REST API: `{ code, message, errors? }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Decode an error body leniently: a response that does not match the
    /// documented shape still yields something displayable.
    pub fn from_value(value: Option<&serde_json::Value>) -> Self {
        match value {
            Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|_| Self {
                code: 0,
                message: v.to_string(),
                errors: None,
            }),
            None => Self {
                code: 0,
                message: "(empty error body)".to_string(),
                errors: None,
            },
        }
    }
}

/// REST request failure as seen by the caller of `request(...)`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 4xx/5xx with the decoded error payload. Never retried internally.
    #[error("api returned {status}: {}", .error.message)]
    Api { status: u16, error: ErrorBody },

    /// The request kept hitting 429 past the bounded retry budget.
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Connection-level failure during the round trip.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    /// Whether the caller may reasonably retry the request as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::RateLimited { .. })
    }
}
