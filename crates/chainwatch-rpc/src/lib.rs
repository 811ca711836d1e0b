//! chainwatch-rpc: Solana JSON-RPC transports for chainwatch.
//!
//! # Overview
//!
//! - [`RpcTransport`]: the async trait both transports implement
//! - [`HttpRpcClient`]: request/response over HTTP with retry
//! - [`WsRpcClient`]: WebSocket with auto-reconnect and re-subscription
//! - [`SolanaRpcClient`]: the [`ChainClient`](chainwatch_core::ChainClient)
//!   implementation used in production

pub mod error;
pub mod http;
pub mod policy;
pub mod request;
pub mod solana;
pub mod transport;
pub mod ws;

pub use error::TransportError;
pub use http::{HttpClientConfig, HttpRpcClient};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use solana::{derive_websocket_endpoint, SolanaClientConfig, SolanaRpcClient, DEFAULT_RPC_ENDPOINT};
pub use transport::RpcTransport;
pub use ws::{WsClientConfig, WsRpcClient};
