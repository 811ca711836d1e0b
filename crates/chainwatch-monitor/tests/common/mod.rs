//! Shared fixtures for the monitor integration tests: a scripted chain
//! client and log/transaction builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::sync::mpsc;

use chainwatch_core::{
    ChainClient, ChainError, Commitment, CompiledInstruction, LogBatch, LogStream,
    SubscriptionHandle, Transaction,
};
use chainwatch_decode::{
    event_discriminator, instruction_discriminator, LAUNCHLAB_PROGRAM_ID, PROGRAM_DATA_MARKER,
    PUMPFUN_PROGRAM_ID,
};

pub const PUMP_MINT: &str = "TokenMint1111111111111111111111111111111111";
pub const LAUNCH_MINT: &str = "LaunchMint111111111111111111111111111111111";

// ─── Mock client ──────────────────────────────────────────────────────────────

struct ScriptedTx {
    delay: Duration,
    tx: Option<Transaction>,
}

/// In-memory [`ChainClient`] with per-program counters and scripted
/// transaction fetches.
#[derive(Default)]
pub struct MockChainClient {
    next_handle: AtomicU64,
    fetches: AtomicUsize,
    opens: Mutex<HashMap<String, usize>>,
    closes: Mutex<HashMap<String, usize>>,
    fail_open: Mutex<Vec<String>>,
    streams: Mutex<HashMap<String, mpsc::UnboundedSender<LogBatch>>>,
    handles: Mutex<HashMap<u64, String>>,
    transactions: Mutex<HashMap<String, ScriptedTx>>,
}

impl MockChainClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `open_log_subscription` fail for `program`.
    pub fn fail_open_for(&self, program: &str) {
        self.fail_open.lock().unwrap().push(program.to_string());
    }

    /// Script the transaction returned for `signature` after `delay`.
    pub fn script_tx(&self, signature: &str, tx: Transaction, delay: Duration) {
        self.transactions.lock().unwrap().insert(
            signature.to_string(),
            ScriptedTx {
                delay,
                tx: Some(tx),
            },
        );
    }

    /// Deliver `batch` on the open subscription for `program`.
    pub fn push(&self, program: &str, batch: LogBatch) -> bool {
        match self.streams.lock().unwrap().get(program) {
            Some(tx) => tx.send(batch).is_ok(),
            None => false,
        }
    }

    pub fn opens(&self, program: &str) -> usize {
        self.opens.lock().unwrap().get(program).copied().unwrap_or(0)
    }

    pub fn closes(&self, program: &str) -> usize {
        self.closes.lock().unwrap().get(program).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.opens.lock().unwrap().values().sum()
    }

    pub fn total_closes(&self) -> usize {
        self.closes.lock().unwrap().values().sum()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn open_log_subscription(
        &self,
        program: &str,
        _commitment: Commitment,
    ) -> Result<(SubscriptionHandle, LogStream), ChainError> {
        *self.opens.lock().unwrap().entry(program.to_string()).or_default() += 1;
        if self.fail_open.lock().unwrap().iter().any(|p| p == program) {
            return Err(ChainError::Transport("connection refused".into()));
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(program.to_string(), tx);
        self.handles.lock().unwrap().insert(id, program.to_string());
        Ok((SubscriptionHandle(id), rx))
    }

    async fn close_log_subscription(&self, handle: SubscriptionHandle) -> Result<(), ChainError> {
        let program = self.handles.lock().unwrap().remove(&handle.0);
        let Some(program) = program else {
            return Err(ChainError::Rpc {
                code: -32602,
                message: "unknown subscription".into(),
            });
        };
        self.streams.lock().unwrap().remove(&program);
        *self.closes.lock().unwrap().entry(program).or_default() += 1;
        Ok(())
    }

    async fn fetch_transaction(&self, signature: &str) -> Result<Option<Transaction>, ChainError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .transactions
            .lock()
            .unwrap()
            .get(signature)
            .map(|s| (s.delay, s.tx.clone()));
        match scripted {
            Some((delay, tx)) => {
                tokio::time::sleep(delay).await;
                Ok(tx)
            }
            None => Ok(None),
        }
    }

    fn endpoint(&self) -> &str {
        "mock://chain"
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

fn borsh_string(s: &str) -> Vec<u8> {
    let mut out = (s.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

fn key(s: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let raw = bs58::decode(s).into_vec().unwrap();
    out[32 - raw.len()..].copy_from_slice(&raw);
    out
}

/// A `Program data:` line carrying a Pump.fun `CreateEvent`.
pub fn create_event_line(name: &str, symbol: &str, mint: &str) -> String {
    let mut data = event_discriminator("CreateEvent").to_vec();
    data.extend(borsh_string(name));
    data.extend(borsh_string(symbol));
    data.extend(borsh_string("https://example.com/meta.json"));
    data.extend(key(mint));
    data.extend([7u8; 32]);
    data.extend([8u8; 32]);
    format!(
        "{PROGRAM_DATA_MARKER}{}",
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}

/// A Pump.fun log batch announcing one creation.
pub fn pump_batch(signature: &str, name: &str, symbol: &str) -> LogBatch {
    LogBatch::new(
        signature,
        vec![
            format!("Program {PUMPFUN_PROGRAM_ID} invoke [1]"),
            "Program log: Instruction: Create".into(),
            create_event_line(name, symbol, PUMP_MINT),
            format!("Program {PUMPFUN_PROGRAM_ID} success"),
        ],
    )
}

/// A Launchlab log batch matching the `Initialize` pattern.
pub fn launch_batch(signature: &str) -> LogBatch {
    LogBatch::new(
        signature,
        vec![
            format!("Program {LAUNCHLAB_PROGRAM_ID} invoke [1]"),
            "Program log: Instruction: Initialize".into(),
            format!("Program {LAUNCHLAB_PROGRAM_ID} success"),
        ],
    )
}

/// `initialize` instruction data with `MintParams { 6, name, symbol, uri }`.
pub fn initialize_data(name: &str, symbol: &str) -> Vec<u8> {
    let mut data = instruction_discriminator("initialize").to_vec();
    data.push(6);
    data.extend(borsh_string(name));
    data.extend(borsh_string(symbol));
    data.extend(borsh_string("https://lab.example/meta.json"));
    data
}

/// A Launchlab transaction: mint at account 1, pool at 4, creator at 6.
pub fn launch_tx(signature: &str, mint: &str, n_accounts: usize, data: Vec<u8>) -> Transaction {
    let mut keys: Vec<String> = (0..9).map(|i| format!("Acct{i}")).collect();
    keys[1] = mint.into();
    keys[4] = "PoolState1".into();
    keys[6] = "Creator1".into();
    keys.push(LAUNCHLAB_PROGRAM_ID.into());
    Transaction {
        signature: signature.into(),
        account_keys: keys,
        instructions: vec![CompiledInstruction {
            program_id_index: 9,
            accounts: (0..n_accounts).collect(),
            data,
        }],
        ..Default::default()
    }
}

// ─── Waiting ──────────────────────────────────────────────────────────────────

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, panicking after two seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
