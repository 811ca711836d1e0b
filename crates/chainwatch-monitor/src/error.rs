//! Error types for monitors, multiplexers and configuration.

use thiserror::Error;

use chainwatch_core::{ChainError, SourceTag};

use crate::multiplexer::ConsumerHandle;

/// Errors surfaced by [`ChainLogMonitor`](crate::ChainLogMonitor).
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{source_tag}: failed to open log subscription: {error}")]
    Subscribe {
        source_tag: SourceTag,
        #[source]
        error: ChainError,
    },

    #[error("chain client unavailable: {0}")]
    Client(#[source] ChainError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors surfaced by [`SubscriptionMultiplexer`](crate::SubscriptionMultiplexer).
#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error("consumer {0} is already attached")]
    AlreadyAttached(ConsumerHandle),

    #[error("consumer {0} is not attached")]
    UnknownConsumer(ConsumerHandle),
}

/// Errors raised while loading [`WatchConfig`](crate::WatchConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
