//! # chainwatch-observability
//!
//! Structured logging for chainwatch.
//!
//! Every crate logs through `tracing` with structured fields (`source`,
//! `mint`, `signature`, `error`). [`init_tracing`] installs the subscriber
//! once at startup: an `EnvFilter` built from a global level plus
//! per-component overrides, and a human-readable or JSON `fmt` layer.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig, ObservabilityError};
