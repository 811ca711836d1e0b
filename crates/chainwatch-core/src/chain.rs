//! ChainClient: the chain-access seam used by every monitor.
//!
//! Monitors only need three primitives: open a push-based log subscription
//! scoped to one program, close it, and fetch a full transaction by
//! signature. Anything implementing [`ChainClient`] can be substituted,
//! which is how the lifecycle tests script the chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ChainError;

/// Commitment level requested from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// One delivery from a log subscription: all log lines of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    pub signature: String,
    pub slot: u64,
    /// Transaction error, if the transaction failed.
    #[serde(default)]
    pub err: Option<Value>,
    pub logs: Vec<String>,
}

impl LogBatch {
    pub fn new(signature: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            signature: signature.into(),
            slot: 0,
            err: None,
            logs,
        }
    }
}

/// Opaque handle for an open log subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Receiving side of a log subscription. Closed when the subscription ends.
pub type LogStream = mpsc::UnboundedReceiver<LogBatch>;

/// A compiled instruction as it appears in a transaction message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledInstruction {
    /// Index into [`Transaction::account_keys`] of the owning program.
    pub program_id_index: usize,
    /// Indices into [`Transaction::account_keys`].
    pub accounts: Vec<usize>,
    /// Raw instruction data.
    pub data: Vec<u8>,
}

/// A fetched transaction, reduced to what instruction decoding needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// Static keys followed by any loaded writable and readonly addresses.
    pub account_keys: Vec<String>,
    /// Top-level instructions, in message order.
    pub instructions: Vec<CompiledInstruction>,
}

impl Transaction {
    /// The program that owns `ix`, if its index is in range.
    pub fn program_id(&self, ix: &CompiledInstruction) -> Option<&str> {
        self.account_keys
            .get(ix.program_id_index)
            .map(String::as_str)
    }

    /// Resolve an instruction's account indices to addresses.
    ///
    /// `None` if any index is out of range (e.g. a lookup-table address the
    /// fetch did not resolve), since the positions of later accounts would
    /// no longer be known.
    pub fn instruction_accounts(&self, ix: &CompiledInstruction) -> Option<Vec<String>> {
        ix.accounts
            .iter()
            .map(|i| self.account_keys.get(*i).cloned())
            .collect()
    }
}

/// The chain-access primitives a monitor depends on.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Open a log subscription for transactions mentioning `program`.
    async fn open_log_subscription(
        &self,
        program: &str,
        commitment: Commitment,
    ) -> Result<(SubscriptionHandle, LogStream), ChainError>;

    /// Release a subscription previously returned by
    /// [`open_log_subscription`](Self::open_log_subscription).
    async fn close_log_subscription(&self, handle: SubscriptionHandle) -> Result<(), ChainError>;

    /// Fetch a transaction by signature. `Ok(None)` when the node does not
    /// know it (yet).
    async fn fetch_transaction(&self, signature: &str) -> Result<Option<Transaction>, ChainError>;

    /// Endpoint description, for logs.
    fn endpoint(&self) -> &str;
}
