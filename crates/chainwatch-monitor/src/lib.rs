//! chainwatch-monitor: live creation monitoring over Solana program logs.
//!
//! # Architecture
//!
//! ```text
//! SubscriptionMultiplexer ──attach/detach──▶ ChainLogMonitor (per source)
//!        ▲  union stream                        │ log subscription
//!        └──────── re-tagged events ◀───────────┘ + decode strategy
//! ```
//!
//! - [`ChainLogMonitor`]: owns one program's log subscription and publishes
//!   decoded [`CreationEvent`](chainwatch_core::CreationEvent)s
//! - [`SubscriptionMultiplexer`]: counts consumers, starts monitors on the
//!   first attach and stops them on the last detach
//! - [`MonitorRegistry`]: builds each monitor and the chain client once
//!
//! # Usage
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use chainwatch_core::SourceTag;
//! use chainwatch_monitor::{MonitorRegistry, WatchConfig};
//!
//! let registry = MonitorRegistry::new(WatchConfig::from_env())?;
//! let multiplexer = registry.multiplexer("Trenches", &SourceTag::ALL).await?;
//! let mut subscription = multiplexer.subscribe().await?;
//! while let Some(event) = subscription.recv().await {
//!     println!("{} {} {}", event.source_tag, event.symbol, event.mint);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod multiplexer;
pub mod registry;

pub use config::{EventSourceConfig, InstructionSourceConfig, WatchConfig};
pub use error::{ConfigError, MonitorError, MultiplexerError};
pub use monitor::{
    ChainLogMonitor, ListenerId, MonitorSettings, MonitorState, MonitorStats, Strategy,
};
pub use multiplexer::{
    ConsumerHandle, MonitorStatus, StatusSnapshot, Subscription, SubscriptionMultiplexer,
};
pub use registry::{ClientFactory, MonitorRegistry};
