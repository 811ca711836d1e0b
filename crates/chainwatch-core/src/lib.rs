//! chainwatch-core: foundation types shared by every chainwatch crate.
//!
//! # Overview
//!
//! chainwatch watches launchpad programs on Solana and republishes every
//! "new token created" occurrence as one normalized event. The core crate
//! defines:
//!
//! - [`CreationEvent`] / [`SourceTag`]: the normalized, source-agnostic event
//! - [`ChainClient`]: the only chain-access primitives the monitors depend on
//! - [`LogBatch`] / [`Transaction`]: the data those primitives deliver
//! - [`ChainError`]: structured error type for the chain access layer

pub mod chain;
pub mod error;
pub mod event;

pub use chain::{
    ChainClient, Commitment, CompiledInstruction, LogBatch, LogStream, SubscriptionHandle,
    Transaction,
};
pub use error::ChainError;
pub use event::{CreationEvent, CreationFields, SourceTag};
