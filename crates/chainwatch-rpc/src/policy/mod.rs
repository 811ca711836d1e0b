//! Reliability policies applied by the transports.
//!
//! ```text
//! Request → [RetryPolicy] → [Transport]
//! ```

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
