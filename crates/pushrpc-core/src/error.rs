//! Error taxonomy shared by both channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Numeric code carried by [`RpcError::Timeout`].
pub const CODE_TIMEOUT: i64 = 504;
/// Numeric code carried by [`RpcError::NotFound`].
pub const CODE_NOT_FOUND: i64 = 404;

/// The `{code, message, details?}` envelope delivered on the wire when
/// either channel produces an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }
}

impl std::fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

/// Errors that can occur during an RPC invocation.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The per-call deadline elapsed before a response arrived.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The named item does not exist on the server.
    #[error("item not found: {0}")]
    NotFound(String),

    /// HTTP or WebSocket transport failure (connection refused, socket
    /// closed unexpectedly, malformed response body).
    #[error("transport error: {0}")]
    Transport(String),

    /// A server-produced error; the envelope is forwarded verbatim.
    #[error("server error {}: {}", .0.code, .0.message)]
    Application(ErrorEnvelope),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Map a wire envelope onto the taxonomy. Codes 404 and anything else
    /// keep their identity; the envelope is never dropped.
    pub fn from_envelope(envelope: ErrorEnvelope) -> Self {
        match envelope.code {
            CODE_NOT_FOUND => Self::NotFound(envelope.message),
            _ => Self::Application(envelope),
        }
    }

    /// The numeric code a caller can dispatch on. Transport and
    /// serialization failures get synthetic codes (502, 500).
    pub fn code(&self) -> i64 {
        match self {
            Self::Timeout { .. } => CODE_TIMEOUT,
            Self::NotFound(_) => CODE_NOT_FOUND,
            Self::Transport(_) => 502,
            Self::Application(envelope) => envelope.code,
            Self::Serialization(_) => 500,
        }
    }

    /// Returns `true` if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<&RpcError> for ErrorEnvelope {
    fn from(err: &RpcError) -> Self {
        match err {
            RpcError::Application(envelope) => envelope.clone(),
            other => ErrorEnvelope::new(other.code(), other.to_string()),
        }
    }
}
