//! WebSocket subscription management.
//!
//! Tracks active `*Subscribe` subscriptions under a stable local id and
//! routes `*Notification` messages by the numeric id the node assigned.
//! After a reconnect the node hands out new ids; [`SubscriptionManager::remap`]
//! points the local id at the new one so callers never see the change.
//!
//! A notification can reach the socket task before the subscribe response
//! reaches the caller. Such notifications are held (up to
//! [`MAX_UNCLAIMED`]) and delivered when the id is registered or remapped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;

/// Stable, client-side identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata for a single subscription.
struct SubscriptionEntry {
    /// Subscribe method, e.g. `"logsSubscribe"`.
    method: String,
    /// Parameters for re-subscribing.
    params: Vec<Value>,
    /// Id currently assigned by the node.
    server_id: u64,
    /// Channel to forward incoming notification results to the caller.
    sender: mpsc::UnboundedSender<Value>,
}

/// Notifications held for server ids nobody has claimed yet.
pub const MAX_UNCLAIMED: usize = 256;

#[derive(Default)]
struct Inner {
    entries: HashMap<SubscriptionId, SubscriptionEntry>,
    by_server_id: HashMap<u64, SubscriptionId>,
    unclaimed: VecDeque<(u64, Value)>,
}

impl Inner {
    fn hold(&mut self, server_id: u64, message: Value) {
        if self.unclaimed.len() == MAX_UNCLAIMED {
            self.unclaimed.pop_front();
        }
        self.unclaimed.push_back((server_id, message));
    }

    /// Deliver held notifications for `server_id`, oldest first.
    fn claim(&mut self, server_id: u64, sender: &mpsc::UnboundedSender<Value>) {
        if !self.unclaimed.iter().any(|(id, _)| *id == server_id) {
            return;
        }
        let (claimed, rest): (VecDeque<_>, VecDeque<_>) =
            self.unclaimed.drain(..).partition(|(id, _)| *id == server_id);
        self.unclaimed = rest;
        for (_, message) in claimed {
            let _ = sender.send(message);
        }
    }
}

/// A subscription to restore after reconnect.
#[derive(Debug, Clone)]
pub struct ActiveSubscription {
    pub id: SubscriptionId,
    pub method: String,
    pub params: Vec<Value>,
}

/// Manages active WebSocket subscriptions and supports re-subscription.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    inner: Arc<Mutex<Inner>>,
    next_local: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // entries stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new subscription the node acknowledged as `server_id`.
    pub fn register(
        &self,
        server_id: u64,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Value>) {
        let id = SubscriptionId(self.next_local.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.claim(server_id, &tx);
        inner.by_server_id.insert(server_id, id);
        inner.entries.insert(
            id,
            SubscriptionEntry {
                method: method.into(),
                params,
                server_id,
                sender: tx,
            },
        );
        (id, rx)
    }

    /// Forward a notification result to the subscription `server_id` routes to.
    ///
    /// Returns `false` if no subscription matched (the notification is held
    /// for a later claim) or its receiver is gone.
    pub fn dispatch(&self, server_id: u64, message: Value) -> bool {
        let mut inner = self.lock();
        if let Some(entry) = inner
            .by_server_id
            .get(&server_id)
            .and_then(|id| inner.entries.get(id))
        {
            return entry.sender.send(message).is_ok();
        }
        inner.hold(server_id, message);
        false
    }

    /// Point `id` at a node id assigned after re-subscribing.
    pub fn remap(&self, id: SubscriptionId, new_server_id: u64) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return false;
        };
        let old = std::mem::replace(&mut entry.server_id, new_server_id);
        let sender = entry.sender.clone();
        inner.by_server_id.remove(&old);
        inner.claim(new_server_id, &sender);
        inner.by_server_id.insert(new_server_id, id);
        true
    }

    /// Remove a subscription, returning the node id to unsubscribe with.
    ///
    /// Dropping the entry closes the caller's receiver.
    pub fn remove(&self, id: SubscriptionId) -> Option<u64> {
        let mut inner = self.lock();
        let entry = inner.entries.remove(&id)?;
        inner.by_server_id.remove(&entry.server_id);
        Some(entry.server_id)
    }

    /// Subscriptions to restore after reconnect.
    pub fn active_subscriptions(&self) -> Vec<ActiveSubscription> {
        self.lock()
            .entries
            .iter()
            .map(|(id, e)| ActiveSubscription {
                id: *id,
                method: e.method.clone(),
                params: e.params.clone(),
            })
            .collect()
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
