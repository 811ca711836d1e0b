//! WebSocket JSON-RPC client with auto-reconnect and subscription management.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::policy::{RetryConfig, RetryPolicy};
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

use super::subscriptions::{SubscriptionId, SubscriptionManager};

type ResponseTx = oneshot::Sender<Result<JsonRpcResponse, TransportError>>;

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Backoff between reconnect attempts.
    pub reconnect: RetryConfig,
    /// How long a request waits for its response.
    pub request_timeout: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            reconnect: RetryConfig::reconnect(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send { req: JsonRpcRequest, tx: ResponseTx },
    Close,
}

/// WebSocket JSON-RPC client.
///
/// Maintains a background task that owns the WebSocket connection and
/// handles reconnect + re-subscribe logic transparently. Requests issued
/// while the connection is down fail fast with [`TransportError::WebSocket`].
pub struct WsRpcClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subscriptions: SubscriptionManager,
    next_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl WsRpcClient {
    /// Start the background task for `url`. The connection is established
    /// asynchronously; the first request waits for it.
    pub fn connect(url: impl Into<String>, config: WsClientConfig) -> Self {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let subscriptions = SubscriptionManager::new();
        let next_id = Arc::new(AtomicU64::new(1));

        tokio::spawn(ws_task(
            url.clone(),
            cmd_rx,
            subscriptions.clone(),
            next_id.clone(),
            RetryPolicy::new(config.reconnect),
        ));

        Self {
            url,
            cmd_tx,
            subscriptions,
            next_id,
            request_timeout: config.request_timeout,
        }
    }

    /// Next request id, shared with the background task.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a subscription with `method` (e.g. `"logsSubscribe"`).
    ///
    /// The node answers with a numeric subscription id; notifications for
    /// it are delivered as their `params.result` value on the receiver.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Value>), TransportError> {
        let server_id: u64 = self
            .call(self.next_request_id(), method, params.clone())
            .await?;
        let (id, rx) = self.subscriptions.register(server_id, method, params);
        tracing::debug!(method, server_id, local_id = %id, "subscription opened");
        Ok((id, rx))
    }

    /// Close a subscription with `method` (e.g. `"logsUnsubscribe"`).
    ///
    /// The local entry is removed (and its receiver closed) even if the
    /// node call fails.
    pub async fn unsubscribe(&self, method: &str, id: SubscriptionId) -> Result<bool, TransportError> {
        let Some(server_id) = self.subscriptions.remove(id) else {
            return Ok(false);
        };
        self.call(self.next_request_id(), method, vec![Value::from(server_id)])
            .await
    }

    /// Number of subscriptions that will be restored on reconnect.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send { req, tx })
            .map_err(|_| TransportError::WebSocket("WS task closed".into()))?;
        match time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::WebSocket("WS response dropped".into())),
            Err(_) => Err(TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
    next_id: Arc<AtomicU64>,
    reconnect: RetryPolicy,
) {
    let mut attempt = 0u32;

    loop {
        tracing::info!(url = %url, "connecting via WebSocket");

        let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                attempt = attempt.saturating_add(1);
                let delay = reconnect.delay_for(attempt);
                tracing::warn!(url = %url, error = %e, "WS connect failed, retrying in {delay:?}");
                if wait_or_close(&mut cmd_rx, delay).await {
                    return;
                }
                continue;
            }
        };
        attempt = 0;
        let (mut sink, mut stream) = ws_stream.split();

        let mut pending: HashMap<u64, ResponseTx> = HashMap::new();
        // request id → local subscription awaiting a fresh node id
        let mut resubscribes: HashMap<u64, SubscriptionId> = HashMap::new();

        for sub in subscriptions.active_subscriptions() {
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            let req = JsonRpcRequest::new(id, sub.method.as_str(), sub.params);
            match serde_json::to_string(&req) {
                Ok(msg) => {
                    if sink.send(Message::Text(msg.into())).await.is_ok() {
                        resubscribes.insert(id, sub.id);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode resubscribe request"),
            }
        }
        if !resubscribes.is_empty() {
            tracing::info!(url = %url, count = resubscribes.len(), "re-subscribing after reconnect");
        }

        let closing = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None | Some(WsCommand::Close) => break true,
                        Some(WsCommand::Send { req, tx }) => {
                            let Some(id) = req.id.as_number() else {
                                let _ = tx.send(Err(TransportError::Other("non-numeric request id".into())));
                                continue;
                            };
                            let msg = match serde_json::to_string(&req) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    let _ = tx.send(Err(e.into()));
                                    continue;
                                }
                            };
                            pending.insert(id, tx);
                            if let Err(e) = sink.send(Message::Text(msg.into())).await {
                                tracing::warn!(error = %e, "WS send failed");
                                break false;
                            }
                        }
                    }
                }
                msg = stream.next() => {
                    match msg {
                        None => break false,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WS receive error");
                            break false;
                        }
                        Some(Ok(Message::Text(text))) => {
                            handle_message(text.as_str(), &mut pending, &mut resubscribes, &subscriptions);
                        }
                        Some(Ok(Message::Close(_))) => break false,
                        _ => {}
                    }
                }
            }
        };

        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(TransportError::WebSocket("connection lost".into())));
        }
        if closing {
            let _ = sink.close().await;
            tracing::debug!(url = %url, "WS client closed");
            return;
        }

        attempt = attempt.saturating_add(1);
        let delay = reconnect.delay_for(attempt);
        tracing::warn!(url = %url, "WS disconnected, reconnecting in {delay:?}");
        if wait_or_close(&mut cmd_rx, delay).await {
            return;
        }
    }
}

/// Sleep for `delay` while failing any request issued in the meantime.
/// Returns `true` if the client asked to close.
async fn wait_or_close(cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>, delay: Duration) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => return true,
                Some(WsCommand::Send { tx, .. }) => {
                    let _ = tx.send(Err(TransportError::WebSocket("not connected".into())));
                }
            }
        }
    }
}

fn handle_message(
    text: &str,
    pending: &mut HashMap<u64, ResponseTx>,
    resubscribes: &mut HashMap<u64, SubscriptionId>,
    subscriptions: &SubscriptionManager,
) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    // Subscription notification, e.g. `logsNotification`
    if let Some(method) = val.get("method").and_then(Value::as_str) {
        if method.ends_with("Notification") {
            let params = &val["params"];
            match params["subscription"].as_u64() {
                Some(server_id) => {
                    if !subscriptions.dispatch(server_id, params["result"].clone()) {
                        tracing::trace!(server_id, method, "notification not delivered yet, subscription unregistered or closed");
                    }
                }
                None => tracing::debug!(method, "notification without subscription id"),
            }
        }
        return;
    }

    let resp = match serde_json::from_value::<JsonRpcResponse>(val) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognized WS message");
            return;
        }
    };
    let Some(id) = resp.id.as_number() else {
        return;
    };

    if let Some(local) = resubscribes.remove(&id) {
        match resp.into_result().map(|v| v.as_u64()) {
            Ok(Some(server_id)) => {
                subscriptions.remap(local, server_id);
                tracing::debug!(local_id = %local, server_id, "subscription restored");
            }
            Ok(None) => {
                subscriptions.remove(local);
                tracing::warn!(local_id = %local, "resubscribe returned no id, subscription closed");
            }
            Err(e) => {
                subscriptions.remove(local);
                tracing::warn!(local_id = %local, error = %e, "resubscribe failed, subscription closed");
            }
        }
        return;
    }

    if let Some(tx) = pending.remove(&id) {
        let _ = tx.send(Ok(resp));
    }
}
