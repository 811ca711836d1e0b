//! Transport-level error types.

use thiserror::Error;

use chainwatch_core::ChainError;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Endpoint URL could not be parsed or converted.
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. } => true,
            // -32005: node is behind / rate limited
            Self::Rpc(e) => e.code == -32005,
            _ => false,
        }
    }
}

impl From<TransportError> for ChainError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rpc(err) => ChainError::Rpc {
                code: err.code,
                message: err.message,
            },
            TransportError::Deserialization(err) => ChainError::Malformed(err.to_string()),
            other => ChainError::Transport(other.to_string()),
        }
    }
}
