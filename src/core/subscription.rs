//! Subscription registry
//!
//! In-memory table of logical subscriptions multiplexed over one connection.
//! Iteration follows insertion order, which is the order used when replaying
//! subscriptions after a reconnect.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::watch::WatchQueue;

/// Inbound payload as routed to handlers and watch streams
pub type Payload = Arc<Value>;

/// Callback invoked with every message routed to a subscription's channel
pub type Handler = Arc<dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Opaque subscription identifier: `<channel>_<uuid>`
///
/// The channel prefix keeps ids traceable in logs; the UUIDv4 suffix makes
/// collisions negligible even across concurrent subscribes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn generate(channel: &str) -> Self {
        Self(format!("{}_{}", channel, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Read-only public shape of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub channel: String,
    pub active: bool,
}

/// Ordered hand-off from the dispatch task to one callback's worker
#[derive(Clone)]
pub struct CallbackFeed {
    tx: mpsc::UnboundedSender<Payload>,
    active: Arc<AtomicBool>,
}

/// Receiving end of a [`CallbackFeed`], owned by the worker
pub struct CallbackInbox {
    rx: mpsc::UnboundedReceiver<Payload>,
    active: Arc<AtomicBool>,
}

impl CallbackFeed {
    pub fn open() -> (Self, CallbackInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        (
            Self {
                tx,
                active: Arc::clone(&active),
            },
            CallbackInbox { rx, active },
        )
    }

    /// Queue a payload; never blocks
    pub fn push(&self, payload: Payload) {
        if self.active.load(Ordering::SeqCst) {
            let _ = self.tx.send(payload);
        }
    }

    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        !self.active.load(Ordering::SeqCst)
    }
}

impl CallbackInbox {
    /// Next payload, or `None` once the feed is closed or every sender is gone
    ///
    /// Blocks the calling thread; only call it off the async workers.
    pub fn blocking_next(&mut self) -> Option<Payload> {
        let payload = self.rx.blocking_recv()?;
        self.active.load(Ordering::SeqCst).then_some(payload)
    }
}

/// Where routed messages go
#[derive(Clone)]
pub enum Delivery {
    /// Caller-supplied callback, run by its own worker
    Callback(CallbackFeed),
    /// Queue feeding a pull-based watch stream
    Queue(Arc<WatchQueue>),
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Callback(_) => f.write_str("Callback"),
            Delivery::Queue(queue) => write!(f, "Queue(len={})", queue.len()),
        }
    }
}

impl Delivery {
    /// Stop delivery; queued but undelivered payloads are discarded
    pub(crate) fn close(&self) {
        match self {
            Delivery::Callback(feed) => feed.close(),
            Delivery::Queue(queue) => queue.close(),
        }
    }
}

/// A registered logical subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub channel: String,
    pub subscribe_message: Value,
    pub unsubscribe_message: Option<Value>,
    pub delivery: Delivery,
    pub active: bool,
}

impl Subscription {
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id.clone(),
            channel: self.channel.clone(),
            active: self.active,
        }
    }
}

/// Insertion-ordered table of subscriptions keyed by id
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_seq: u64,
    entries: BTreeMap<u64, Subscription>,
    index: HashMap<SubscriptionId, u64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription; returns false (and leaves the table untouched)
    /// if the id is already registered.
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        if self.index.contains_key(&subscription.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(subscription.id.clone(), seq);
        self.entries.insert(seq, subscription);
        true
    }

    /// Deactivate and remove a subscription, returning it
    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let seq = self.index.remove(id)?;
        let mut subscription = self.entries.remove(&seq)?;
        subscription.active = false;
        Some(subscription)
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.index.get(id).and_then(|seq| self.entries.get(seq))
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of active entries
    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|s| s.active).count()
    }

    /// Deliveries of active subscriptions on `channel`, in registry order
    pub fn deliveries_for(&self, channel: &str) -> Vec<(SubscriptionId, Delivery)> {
        self.entries
            .values()
            .filter(|s| s.active && s.channel == channel)
            .map(|s| (s.id.clone(), s.delivery.clone()))
            .collect()
    }

    /// Subscribe payloads of active subscriptions, in registry order
    pub fn replay_messages(&self) -> Vec<(SubscriptionId, Value)> {
        self.entries
            .values()
            .filter(|s| s.active)
            .map(|s| (s.id.clone(), s.subscribe_message.clone()))
            .collect()
    }

    /// Ids of active subscriptions, in registry order
    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        self.entries
            .values()
            .filter(|s| s.active)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Drop every entry, deactivating each one
    pub fn drain(&mut self) -> Vec<Subscription> {
        self.index.clear();
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|mut s| {
                s.active = false;
                s
            })
            .collect()
    }
}
