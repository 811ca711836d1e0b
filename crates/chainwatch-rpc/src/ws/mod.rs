//! WebSocket JSON-RPC transport with auto-reconnect.
//!
//! # Features
//! - Auto-reconnect on disconnect (exponential backoff)
//! - Subscription management (`*Subscribe` / `*Unsubscribe`)
//! - Auto-resubscribe after reconnect with id remapping
//! - Request multiplexing over a single connection

pub mod client;
pub mod subscriptions;

pub use client::{WsClientConfig, WsRpcClient};
pub use subscriptions::{SubscriptionId, SubscriptionManager};
