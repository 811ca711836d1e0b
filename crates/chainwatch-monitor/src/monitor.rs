//! `ChainLogMonitor`: one log subscription scoped to one program.
//!
//! The monitor owns the subscription lifecycle and a log pump task. Every
//! delivered [`LogBatch`] runs through the monitor's [`Strategy`]; decoded
//! events are published on the monitor's "created" broadcast channel, which
//! multiplexers consume through [`ChainLogMonitor::register_listener`].
//!
//! Instruction-derived decodes run as independent tasks, so their events may
//! be published out of batch order. Every start bumps an epoch; a decode that
//! completes after `stop()` (or after a restart) is dropped instead of
//! published.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chainwatch_core::{
    ChainClient, Commitment, CreationEvent, LogBatch, LogStream, SourceTag, SubscriptionHandle,
};
use chainwatch_decode::{DecodeOutcome, EventLogDecoder, InstructionExtractor};

use crate::error::MonitorError;

// ─── State ───────────────────────────────────────────────────────────────────

/// Lifecycle state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Starting,
    Monitoring,
    Stopping,
}

impl MonitorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Monitoring,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Starting => 1,
            Self::Monitoring => 2,
            Self::Stopping => 3,
        }
    }
}

/// Identifies one consumer of a monitor's "created" channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// A process-unique listener id.
    pub fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// How a monitor turns log batches into creation events.
pub enum Strategy {
    /// Decode `Program data:` lines in place. Preserves batch order.
    DirectEvent(EventLogDecoder),
    /// Pattern-match, then fetch and decode the transaction in a task.
    Instruction(Arc<InstructionExtractor>),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectEvent(_) => "direct-event",
            Self::Instruction(_) => "instruction",
        }
    }

    pub fn decoding_enabled(&self) -> bool {
        match self {
            Self::DirectEvent(decoder) => decoder.decoding_enabled(),
            Self::Instruction(extractor) => extractor.decoding_enabled(),
        }
    }
}

/// Counters for one monitor.
#[derive(Debug, Default)]
struct Counters {
    batches_seen: AtomicU64,
    failed_tx_skipped: AtomicU64,
    extractions_started: AtomicU64,
    events_emitted: AtomicU64,
    events_suppressed: AtomicU64,
    decode_failures: AtomicU64,
}

/// Snapshot of a monitor's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub batches_seen: u64,
    pub failed_tx_skipped: u64,
    pub extractions_started: u64,
    pub events_emitted: u64,
    pub events_suppressed: u64,
    pub decode_failures: u64,
}

#[derive(Default)]
struct Lifecycle {
    handle: Option<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
}

/// Construction settings shared by every monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub commitment: Commitment,
    pub channel_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            commitment: Commitment::Confirmed,
            channel_capacity: 1_024,
        }
    }
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

/// Watches one program's logs and publishes creation events.
pub struct ChainLogMonitor {
    source: SourceTag,
    program_id: String,
    commitment: Commitment,
    client: Arc<dyn ChainClient>,
    strategy: Strategy,
    state: AtomicU8,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    created_tx: broadcast::Sender<CreationEvent>,
    listeners: Mutex<HashSet<ListenerId>>,
    epoch: AtomicU64,
    in_flight: AtomicUsize,
    counters: Counters,
}

impl ChainLogMonitor {
    pub fn new(
        source: SourceTag,
        program_id: impl Into<String>,
        client: Arc<dyn ChainClient>,
        strategy: Strategy,
        settings: MonitorSettings,
    ) -> Self {
        let (created_tx, _) = broadcast::channel(settings.channel_capacity.max(1));
        Self {
            source,
            program_id: program_id.into(),
            commitment: settings.commitment,
            client,
            strategy,
            state: AtomicU8::new(MonitorState::Idle.as_u8()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            created_tx,
            listeners: Mutex::new(HashSet::new()),
            epoch: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Monitor using the direct event-log strategy.
    pub fn direct_event(
        source: SourceTag,
        program_id: impl Into<String>,
        client: Arc<dyn ChainClient>,
        decoder: EventLogDecoder,
        settings: MonitorSettings,
    ) -> Self {
        Self::new(source, program_id, client, Strategy::DirectEvent(decoder), settings)
    }

    /// Monitor using the instruction-derived strategy. The program address
    /// comes from the extractor's layout.
    pub fn instruction(
        source: SourceTag,
        client: Arc<dyn ChainClient>,
        extractor: InstructionExtractor,
        settings: MonitorSettings,
    ) -> Self {
        let program_id = extractor.layout().program_id.clone();
        Self::new(
            source,
            program_id,
            client,
            Strategy::Instruction(Arc::new(extractor)),
            settings,
        )
    }

    pub fn source(&self) -> SourceTag {
        self.source
    }

    pub fn program_id(&self) -> &str {
        &self.program_id
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: MonitorState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// True iff the monitor is `Monitoring`.
    pub fn is_active(&self) -> bool {
        self.state() == MonitorState::Monitoring
    }

    /// Instruction decodes currently awaiting a transaction fetch.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Open the log subscription and spawn the pump.
    ///
    /// Returns `Ok` without reopening when already `Monitoring`. On failure
    /// the monitor is back in `Idle`.
    pub async fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_active() {
            info!(source = %self.source, "monitor already running");
            return Ok(());
        }

        self.set_state(MonitorState::Starting);
        info!(
            source = %self.source,
            program = %self.program_id,
            commitment = self.commitment.as_str(),
            "opening log subscription"
        );
        match self
            .client
            .open_log_subscription(&self.program_id, self.commitment)
            .await
        {
            Ok((handle, stream)) => {
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                lifecycle.handle = Some(handle);
                self.set_state(MonitorState::Monitoring);
                lifecycle.pump = Some(tokio::spawn(Arc::clone(self).pump(stream, epoch)));
                info!(
                    source = %self.source,
                    subscription = %handle,
                    strategy = self.strategy.name(),
                    decoding = self.strategy.decoding_enabled(),
                    "monitoring started"
                );
                Ok(())
            }
            Err(error) => {
                self.set_state(MonitorState::Idle);
                warn!(source = %self.source, error = %error, "failed to start monitoring");
                Err(MonitorError::Subscribe {
                    source_tag: self.source,
                    error,
                })
            }
        }
    }

    /// Release the subscription. No-op when `Idle`.
    ///
    /// The handle is cleared before this returns. In-flight instruction
    /// decodes keep running, but their events are suppressed.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await;
    }

    /// Stop only if no listener is registered. Returns whether it stopped.
    ///
    /// The check runs under the lifecycle lock, so a listener registered by
    /// a concurrent `start()` caller is always seen.
    pub async fn stop_if_unused(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.listener_count() > 0 {
            debug!(source = %self.source, listeners = self.listener_count(), "monitor still in use");
            return false;
        }
        self.stop_locked(&mut lifecycle).await
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) -> bool {
        if self.state() == MonitorState::Idle {
            return false;
        }

        self.set_state(MonitorState::Stopping);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(pump) = lifecycle.pump.take() {
            pump.abort();
        }
        if let Some(handle) = lifecycle.handle.take() {
            if let Err(e) = self.client.close_log_subscription(handle).await {
                warn!(
                    source = %self.source,
                    subscription = %handle,
                    error = %e,
                    "failed to release log subscription"
                );
            }
        }
        self.set_state(MonitorState::Idle);
        info!(
            source = %self.source,
            in_flight = self.in_flight(),
            "monitoring stopped"
        );
        true
    }

    // ─── Listeners ───────────────────────────────────────────────────────────

    fn listeners(&self) -> MutexGuard<'_, HashSet<ListenerId>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `id` on the "created" channel.
    ///
    /// Returns `None` when `id` is already registered.
    pub fn register_listener(&self, id: ListenerId) -> Option<broadcast::Receiver<CreationEvent>> {
        let mut listeners = self.listeners();
        if !listeners.insert(id) {
            debug!(source = %self.source, listener = %id, "listener already registered");
            return None;
        }
        Some(self.created_tx.subscribe())
    }

    /// Remove `id`. Returns whether it was registered.
    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.listeners().remove(&id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    pub fn stats(&self) -> MonitorStats {
        let c = &self.counters;
        MonitorStats {
            batches_seen: c.batches_seen.load(Ordering::Relaxed),
            failed_tx_skipped: c.failed_tx_skipped.load(Ordering::Relaxed),
            extractions_started: c.extractions_started.load(Ordering::Relaxed),
            events_emitted: c.events_emitted.load(Ordering::Relaxed),
            events_suppressed: c.events_suppressed.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
        }
    }

    // ─── Pump ────────────────────────────────────────────────────────────────

    async fn pump(self: Arc<Self>, mut stream: LogStream, epoch: u64) {
        while let Some(batch) = stream.recv().await {
            self.handle_batch(batch, epoch);
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch || !self.is_active() {
            return;
        }
        warn!(source = %self.source, "log stream ended, monitor is no longer active");
        // detach rather than abort: this task is the pump
        lifecycle.pump = None;
        self.stop_locked(&mut lifecycle).await;
    }

    fn handle_batch(self: &Arc<Self>, batch: LogBatch, epoch: u64) {
        self.counters.batches_seen.fetch_add(1, Ordering::Relaxed);
        if batch.err.is_some() {
            self.counters.failed_tx_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(source = %self.source, signature = %batch.signature, "skipping failed transaction");
            return;
        }

        match &self.strategy {
            Strategy::DirectEvent(decoder) => {
                for event in decoder.decode_batch(&batch) {
                    self.emit(event, epoch);
                }
            }
            Strategy::Instruction(extractor) => {
                if !extractor.matches_invocation(&batch.logs) {
                    return;
                }
                self.counters.extractions_started.fetch_add(1, Ordering::Relaxed);
                debug!(source = %self.source, signature = %batch.signature, "creation pattern matched");

                let guard = InFlight::enter(Arc::clone(self));
                let extractor = Arc::clone(extractor);
                tokio::spawn(async move {
                    let monitor = &guard.0;
                    let outcome = extractor
                        .extract(monitor.client.as_ref(), &batch.signature)
                        .await;
                    match outcome {
                        DecodeOutcome::Matched(event) => monitor.emit(event, epoch),
                        DecodeOutcome::NoMatch => {}
                        DecodeOutcome::Failed(e) => {
                            monitor.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                source = %monitor.source,
                                signature = %batch.signature,
                                error = %e,
                                "creation extraction failed"
                            );
                        }
                    }
                });
            }
        }
    }

    fn emit(&self, event: CreationEvent, epoch: u64) {
        if !self.is_active() || self.epoch.load(Ordering::SeqCst) != epoch {
            self.counters.events_suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(source = %self.source, mint = %event.mint, "dropping event completed after stop");
            return;
        }

        self.counters.events_emitted.fetch_add(1, Ordering::Relaxed);
        info!(
            source = %self.source,
            mint = %event.mint,
            name = %event.name,
            symbol = %event.symbol,
            "creation detected"
        );
        if self.created_tx.send(event).is_err() {
            debug!(source = %self.source, "no listeners for creation event");
        }
    }
}

/// Counts one in-flight extraction for as long as it lives.
struct InFlight(Arc<ChainLogMonitor>);

impl InFlight {
    fn enter(monitor: Arc<ChainLogMonitor>) -> Self {
        monitor.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(monitor)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
