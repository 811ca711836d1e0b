//! `SubscriptionMultiplexer`: reference-counted fan-in over several monitors.
//!
//! The first consumer to attach registers the multiplexer on every monitor
//! and starts them; the last one to detach deregisters and stops them. Events
//! from every monitor are re-tagged with their source and republished on one
//! union broadcast channel. Consumers only see events produced while they are
//! attached.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chainwatch_core::{CreationEvent, SourceTag};

use crate::error::MultiplexerError;
use crate::monitor::{ChainLogMonitor, ListenerId, MonitorState, MonitorStats};

/// Opaque per-consumer handle, e.g. one per client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerHandle(pub u64);

static NEXT_CONSUMER: AtomicU64 = AtomicU64::new(1);

impl ConsumerHandle {
    /// A process-unique consumer handle.
    pub fn next() -> Self {
        Self(NEXT_CONSUMER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Status of one monitor under a multiplexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub source_tag: SourceTag,
    pub is_active: bool,
    pub state: MonitorState,
    pub decoding_enabled: bool,
    pub stats: MonitorStats,
    pub message: String,
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub label: String,
    pub consumer_count: usize,
    pub monitors: Vec<MonitorStatus>,
}

impl StatusSnapshot {
    /// True when at least one monitor is running.
    pub fn any_active(&self) -> bool {
        self.monitors.iter().any(|m| m.is_active)
    }

    pub fn all_active(&self) -> bool {
        !self.monitors.is_empty() && self.monitors.iter().all(|m| m.is_active)
    }

    /// Summary line for the whole multiplexer.
    pub fn message(&self) -> String {
        status_message(&self.label, self.any_active(), self.consumer_count)
    }
}

fn status_message(label: &str, active: bool, consumers: usize) -> String {
    if active {
        format!("{label} monitoring is active ({consumers} active subscriptions)")
    } else {
        format!("{label} monitoring is not active - no subscriptions")
    }
}

// ─── Multiplexer ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Attachments {
    consumers: HashSet<ConsumerHandle>,
    forwarders: Vec<JoinHandle<()>>,
}

/// Merges several monitors into one tagged stream, starting and stopping
/// them with the number of attached consumers.
pub struct SubscriptionMultiplexer {
    label: String,
    listener: ListenerId,
    monitors: Vec<Arc<ChainLogMonitor>>,
    attachments: tokio::sync::Mutex<Attachments>,
    consumer_count: AtomicUsize,
    union_tx: broadcast::Sender<CreationEvent>,
}

impl SubscriptionMultiplexer {
    pub fn new(
        label: impl Into<String>,
        monitors: Vec<Arc<ChainLogMonitor>>,
        channel_capacity: usize,
    ) -> Self {
        let (union_tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            label: label.into(),
            listener: ListenerId::next(),
            monitors,
            attachments: tokio::sync::Mutex::new(Attachments::default()),
            consumer_count: AtomicUsize::new(0),
            union_tx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn monitors(&self) -> &[Arc<ChainLogMonitor>] {
        &self.monitors
    }

    pub fn consumer_count(&self) -> usize {
        self.consumer_count.load(Ordering::SeqCst)
    }

    /// Attach a consumer and return its receiver of the union stream.
    ///
    /// On the first attach every monitor is registered and started
    /// concurrently. A monitor that fails to start is logged and shows up as
    /// inactive in [`status_snapshot`](Self::status_snapshot); the attach
    /// itself still succeeds.
    pub async fn attach(
        &self,
        handle: ConsumerHandle,
    ) -> Result<broadcast::Receiver<CreationEvent>, MultiplexerError> {
        let mut attachments = self.attachments.lock().await;
        if attachments.consumers.contains(&handle) {
            return Err(MultiplexerError::AlreadyAttached(handle));
        }

        let rx = self.union_tx.subscribe();
        attachments.consumers.insert(handle);
        let count = attachments.consumers.len();
        self.consumer_count.store(count, Ordering::SeqCst);
        info!(label = %self.label, consumer = %handle, consumers = count, "consumer attached");

        if count == 1 {
            for monitor in &self.monitors {
                if let Some(created) = monitor.register_listener(self.listener) {
                    let forwarder = forward(created, self.union_tx.clone(), monitor.source());
                    attachments.forwarders.push(tokio::spawn(forwarder));
                }
            }

            let results = join_all(self.monitors.iter().map(|m| m.start())).await;
            for (monitor, result) in self.monitors.iter().zip(results) {
                if let Err(e) = result {
                    warn!(
                        label = %self.label,
                        source = %monitor.source(),
                        error = %e,
                        "monitor failed to start"
                    );
                }
            }
        }

        Ok(rx)
    }

    /// Detach a consumer.
    ///
    /// On the last detach the multiplexer deregisters from every monitor and
    /// stops each one that no other multiplexer still listens to. Detaching
    /// an unknown handle is rejected and leaves the count untouched.
    pub async fn detach(&self, handle: ConsumerHandle) -> Result<(), MultiplexerError> {
        let mut attachments = self.attachments.lock().await;
        if !attachments.consumers.remove(&handle) {
            warn!(label = %self.label, consumer = %handle, "detach of unknown consumer");
            return Err(MultiplexerError::UnknownConsumer(handle));
        }

        let count = attachments.consumers.len();
        self.consumer_count.store(count, Ordering::SeqCst);
        info!(label = %self.label, consumer = %handle, consumers = count, "consumer detached");

        if count == 0 {
            for forwarder in attachments.forwarders.drain(..) {
                forwarder.abort();
            }
            for monitor in &self.monitors {
                monitor.deregister_listener(self.listener);
            }

            let stopped = join_all(self.monitors.iter().map(|m| m.stop_if_unused())).await;
            for (monitor, stopped) in self.monitors.iter().zip(stopped) {
                if !stopped && monitor.is_active() {
                    debug!(
                        label = %self.label,
                        source = %monitor.source(),
                        "monitor kept running for other listeners"
                    );
                }
            }
        }

        Ok(())
    }

    /// Per-monitor activity and the current consumer count.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        let consumer_count = self.consumer_count();
        let monitors = self
            .monitors
            .iter()
            .map(|m| {
                let is_active = m.is_active();
                MonitorStatus {
                    source_tag: m.source(),
                    is_active,
                    state: m.state(),
                    decoding_enabled: m.strategy().decoding_enabled(),
                    stats: m.stats(),
                    message: status_message(m.source().label(), is_active, consumer_count),
                }
            })
            .collect();
        StatusSnapshot {
            label: self.label.clone(),
            consumer_count,
            monitors,
        }
    }

    /// Attach under a fresh handle; the returned [`Subscription`] detaches
    /// on [`close`](Subscription::close) or drop.
    pub async fn subscribe(self: &Arc<Self>) -> Result<Subscription, MultiplexerError> {
        let handle = ConsumerHandle::next();
        let rx = self.attach(handle).await?;
        Ok(Subscription {
            handle,
            rx,
            multiplexer: Some(Arc::clone(self)),
        })
    }
}

/// Re-tag and republish one monitor's events until its channel closes.
async fn forward(
    mut created: broadcast::Receiver<CreationEvent>,
    union_tx: broadcast::Sender<CreationEvent>,
    source: SourceTag,
) {
    loop {
        match created.recv().await {
            Ok(event) => {
                // No receivers just means nobody is listening right now.
                let _ = union_tx.send(event.tagged(source));
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(source = %source, skipped, "forwarder lagged, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// One consumer's view of the union stream.
pub struct Subscription {
    handle: ConsumerHandle,
    rx: broadcast::Receiver<CreationEvent>,
    multiplexer: Option<Arc<SubscriptionMultiplexer>>,
}

impl Subscription {
    pub fn handle(&self) -> ConsumerHandle {
        self.handle
    }

    /// Next event, or `None` once the stream is closed. Lagged events are
    /// logged and skipped.
    pub async fn recv(&mut self) -> Option<CreationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(consumer = %self.handle, skipped, "subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a [`Stream`]. Dropping the stream detaches.
    pub fn into_stream(self) -> impl Stream<Item = CreationEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }

    /// Detach now and wait for it to complete.
    pub async fn close(mut self) {
        if let Some(multiplexer) = self.multiplexer.take() {
            if let Err(e) = multiplexer.detach(self.handle).await {
                warn!(consumer = %self.handle, error = %e, "detach on close failed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(multiplexer) = self.multiplexer.take() else {
            return;
        };
        let handle = self.handle;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = multiplexer.detach(handle).await {
                        warn!(consumer = %handle, error = %e, "detach on drop failed");
                    }
                });
            }
            Err(_) => {
                warn!(consumer = %handle, "subscription dropped outside a runtime; not detached");
            }
        }
    }
}
