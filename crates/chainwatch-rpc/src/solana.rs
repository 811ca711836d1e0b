//! `SolanaRpcClient`: [`ChainClient`] over Solana JSON-RPC.
//!
//! Log subscriptions go over WebSocket (`logsSubscribe` / `logsUnsubscribe`);
//! transaction fetches go over HTTP (`getTransaction`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use chainwatch_core::{
    ChainClient, ChainError, Commitment, CompiledInstruction, LogBatch, LogStream,
    SubscriptionHandle, Transaction,
};

use crate::error::TransportError;
use crate::http::{HttpClientConfig, HttpRpcClient};
use crate::transport::RpcTransport;
use crate::ws::{SubscriptionId, WsClientConfig, WsRpcClient};

/// Public mainnet endpoint used when nothing is configured.
pub const DEFAULT_RPC_ENDPOINT: &str = "https://api.mainnet-beta.solana.com";

/// Derive the WebSocket endpoint the way Solana tooling does: switch
/// `http`→`ws` / `https`→`wss` and bump an explicit port by one.
pub fn derive_websocket_endpoint(http_endpoint: &str) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidEndpoint {
        url: http_endpoint.to_string(),
        reason,
    };
    let mut url = url::Url::parse(http_endpoint).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch to {scheme}")))?;
    if let Some(port) = url.port() {
        let next = port
            .checked_add(1)
            .ok_or_else(|| invalid(format!("port {port} cannot be incremented")))?;
        url.set_port(Some(next))
            .map_err(|_| invalid("cannot set port".to_string()))?;
    }
    Ok(url.to_string())
}

/// Configuration for [`SolanaRpcClient`].
#[derive(Debug, Clone, Default)]
pub struct SolanaClientConfig {
    pub http: HttpClientConfig,
    pub ws: WsClientConfig,
}

/// Solana chain client combining an HTTP and a WebSocket transport.
pub struct SolanaRpcClient {
    http: HttpRpcClient,
    ws: WsRpcClient,
}

impl SolanaRpcClient {
    /// Build a client for `rpc_endpoint`. When `ws_endpoint` is `None` it is
    /// derived with [`derive_websocket_endpoint`].
    pub fn connect(
        rpc_endpoint: &str,
        ws_endpoint: Option<&str>,
        config: SolanaClientConfig,
    ) -> Result<Self, TransportError> {
        let ws_url = match ws_endpoint {
            Some(ws) => ws.to_string(),
            None => derive_websocket_endpoint(rpc_endpoint)?,
        };
        let http = HttpRpcClient::new(rpc_endpoint, config.http)?;
        let ws = WsRpcClient::connect(ws_url, config.ws);
        tracing::info!(rpc = %rpc_endpoint, ws = %ws.url(), "solana client ready");
        Ok(Self { http, ws })
    }

    /// WebSocket endpoint in use.
    pub fn websocket_endpoint(&self) -> &str {
        self.ws.url()
    }
}

#[async_trait]
impl ChainClient for SolanaRpcClient {
    async fn open_log_subscription(
        &self,
        program: &str,
        commitment: Commitment,
    ) -> Result<(SubscriptionHandle, LogStream), ChainError> {
        let params = vec![
            json!({ "mentions": [program] }),
            json!({ "commitment": commitment.as_str() }),
        ];
        let (id, mut raw) = self.ws.subscribe("logsSubscribe", params).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let program = program.to_string();
        tokio::spawn(async move {
            while let Some(result) = raw.recv().await {
                match parse_logs_notification(result) {
                    Ok(batch) => {
                        if tx.send(batch).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!(program = %program, error = %e, "skipping malformed logs notification"),
                }
            }
        });

        Ok((SubscriptionHandle(id.0), rx))
    }

    async fn close_log_subscription(&self, handle: SubscriptionHandle) -> Result<(), ChainError> {
        let removed = self
            .ws
            .unsubscribe("logsUnsubscribe", SubscriptionId(handle.0))
            .await?;
        if !removed {
            tracing::debug!(handle = %handle, "unsubscribe acknowledged without removal");
        }
        Ok(())
    }

    async fn fetch_transaction(&self, signature: &str) -> Result<Option<Transaction>, ChainError> {
        let params = vec![
            Value::from(signature),
            json!({
                "encoding": "json",
                "maxSupportedTransactionVersion": 0,
                "commitment": Commitment::Confirmed.as_str(),
            }),
        ];
        let raw: Option<RpcTransaction> = self
            .http
            .call(self.ws.next_request_id(), "getTransaction", params)
            .await?;
        raw.map(|tx| tx.into_transaction(signature)).transpose()
    }

    fn endpoint(&self) -> &str {
        self.http.url()
    }
}

// ─── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LogsNotification {
    context: NotificationContext,
    value: LogsValue,
}

#[derive(Deserialize)]
struct NotificationContext {
    slot: u64,
}

#[derive(Deserialize)]
struct LogsValue {
    signature: String,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    logs: Vec<String>,
}

fn parse_logs_notification(result: Value) -> Result<LogBatch, serde_json::Error> {
    let n: LogsNotification = serde_json::from_value(result)?;
    Ok(LogBatch {
        signature: n.value.signature,
        slot: n.context.slot,
        err: n.value.err.filter(|e| !e.is_null()),
        logs: n.value.logs,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    slot: u64,
    #[serde(default)]
    block_time: Option<i64>,
    transaction: RpcTransactionBody,
    #[serde(default)]
    meta: Option<RpcMeta>,
}

#[derive(Deserialize)]
struct RpcTransactionBody {
    message: RpcMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMessage {
    account_keys: Vec<String>,
    instructions: Vec<RpcInstruction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcInstruction {
    program_id_index: usize,
    accounts: Vec<usize>,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMeta {
    #[serde(default)]
    loaded_addresses: Option<RpcLoadedAddresses>,
}

#[derive(Deserialize, Default)]
struct RpcLoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

impl RpcTransaction {
    fn into_transaction(self, signature: &str) -> Result<Transaction, ChainError> {
        let mut account_keys = self.transaction.message.account_keys;
        // v0 messages index past the static keys into the lookup-table loads
        if let Some(loaded) = self.meta.and_then(|m| m.loaded_addresses) {
            account_keys.extend(loaded.writable);
            account_keys.extend(loaded.readonly);
        }

        let instructions = self
            .transaction
            .message
            .instructions
            .into_iter()
            .map(|ix| {
                let data = bs58::decode(&ix.data).into_vec().map_err(|e| {
                    ChainError::Malformed(format!("instruction data is not base58: {e}"))
                })?;
                Ok(CompiledInstruction {
                    program_id_index: ix.program_id_index,
                    accounts: ix.accounts,
                    data,
                })
            })
            .collect::<Result<Vec<_>, ChainError>>()?;

        Ok(Transaction {
            signature: signature.to_string(),
            slot: self.slot,
            block_time: self.block_time,
            account_keys,
            instructions,
        })
    }
}
