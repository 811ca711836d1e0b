//! Chain-access error types.

use thiserror::Error;

/// Errors surfaced by a [`ChainClient`](crate::ChainClient) implementation.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection, send or receive failure below the JSON-RPC layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered, but the payload did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The subscription or connection was already closed.
    #[error("connection closed")]
    Closed,
}

impl ChainError {
    /// Returns `true` if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed)
    }
}
