//! Connection manager: many logical subscriptions over one transport
//!
//! Owns the subscription registry, routes every inbound frame to the
//! subscriptions of its channel, and replays all active subscriptions when
//! the transport reports a new session. Inbound frames are processed by one
//! dispatch task per session; registry mutations are serialized by a short
//! mutex that is never held across an await, and wire sends of subscribe,
//! unsubscribe and replay payloads are serialized by a second, async lock.
//!
//! Callbacks never run on the dispatch task. Each callback subscription owns
//! a worker on the blocking pool that drains its feed in arrival order, so a
//! slow or stuck handler only delays its own subscription.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::traits::{Connection, ConnectionEvent, EventReceiver};
use crate::config::StreamConfig;

use super::events::{EventBus, ManagerEvent};
use super::logging::redact_payload;
use super::subscription::{
    handler, CallbackFeed, CallbackInbox, Delivery, Handler, Payload, Subscription,
    SubscriptionId, SubscriptionInfo, SubscriptionRegistry,
};
use super::watch::{WatchQueue, WatchStream};

/// Pulls the routing channel out of an inbound frame
pub type ChannelExtractor = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Default extractor: the string field `channel` of a JSON object
pub fn channel_field(payload: &Value) -> Option<String> {
    payload
        .get("channel")
        .and_then(Value::as_str)
        .map(str::to_string)
}

struct Session {
    dispatch: JoinHandle<()>,
}

struct ManagerInner {
    connection: Arc<dyn Connection>,
    registry: Mutex<SubscriptionRegistry>,
    /// Serializes subscribe/unsubscribe/replay sends
    wire: tokio::sync::Mutex<()>,
    session: tokio::sync::Mutex<Option<Session>>,
    /// A session exists (connect() succeeded, no disconnect() since)
    live: AtomicBool,
    events: EventBus,
    dropped: Arc<AtomicU64>,
    extractor: ChannelExtractor,
    config: StreamConfig,
}

impl ManagerInner {
    fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn can_send(&self) -> bool {
        self.live.load(Ordering::SeqCst) && self.connection.is_connected()
    }

    /// Remove a subscription and stop its delivery
    fn deregister(&self, id: &SubscriptionId) -> Option<Subscription> {
        let removed = self.registry().remove(id);
        if let Some(sub) = &removed {
            sub.delivery.close();
        }
        removed
    }

    /// Best-effort teardown; failures become error events
    async fn send_teardown(&self, id: &SubscriptionId, channel: &str, message: Value) {
        let _wire = self.wire.lock().await;
        if !self.can_send() {
            debug!(subscription_id = %id, channel = %channel, "Teardown skipped, transport down");
            return;
        }
        if let Err(e) = self.connection.send(&message).await {
            self.events.emit_error(ExchangeError::SubscriptionFailed {
                channel: channel.to_string(),
                reason: format!("unsubscribe send for {} failed: {}", id, e),
            });
        }
    }

    fn route(&self, frame: Value) {
        let Some(channel) = (self.extractor)(&frame) else {
            trace!("Frame without channel ignored");
            return;
        };

        let payload: Payload = Arc::new(frame);
        self.events.emit(ManagerEvent::Message {
            channel: channel.clone(),
            payload: Arc::clone(&payload),
        });

        let deliveries = self.registry().deliveries_for(&channel);
        for (_, delivery) in deliveries {
            match delivery {
                Delivery::Queue(queue) => {
                    queue.push(Arc::clone(&payload));
                }
                Delivery::Callback(feed) => feed.push(Arc::clone(&payload)),
            }
        }
    }

    /// The transport gave up: drop the session but keep the registry
    async fn end_session(&self) {
        let mut session = self.session.lock().await;
        self.live.store(false, Ordering::SeqCst);
        // Called from the dispatch task itself, which returns right after
        session.take();
        warn!(
            subscriptions = self.registry().active_count(),
            "Transport closed, session ended"
        );
    }

    /// Resend every active subscribe payload, in registry order
    async fn replay(&self) {
        let _wire = self.wire.lock().await;
        let messages = self.registry().replay_messages();
        let total = messages.len();
        let mut failed = 0usize;

        for (id, message) in messages {
            let still_active = self.registry().contains(&id);
            if !still_active {
                continue;
            }
            if let Err(e) = self.connection.send(&message).await {
                failed += 1;
                self.events.emit_error(ExchangeError::SendFailed(format!(
                    "resubscribe of {} failed: {}",
                    id, e
                )));
            }
        }

        info!(total, failed, "Subscriptions replayed after reconnect");
        self.events.emit(ManagerEvent::Reconnected);
    }
}

/// Start the worker that runs `handler` for every payload of one subscription
fn spawn_callback_worker(id: SubscriptionId, handler: Handler, events: EventBus) -> CallbackFeed {
    let (feed, inbox) = CallbackFeed::open();
    tokio::task::spawn_blocking(move || callback_worker(id, handler, events, inbox));
    feed
}

fn callback_worker(id: SubscriptionId, handler: Handler, events: EventBus, mut inbox: CallbackInbox) {
    while let Some(payload) = inbox.blocking_next() {
        match catch_unwind(AssertUnwindSafe(|| handler(&payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => events.emit_error(ExchangeError::Handler {
                subscription_id: id.to_string(),
                reason: format!("{:#}", e),
            }),
            Err(panic) => events.emit_error(ExchangeError::Handler {
                subscription_id: id.to_string(),
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }
    trace!(subscription_id = %id, "Callback worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drains transport events for one session
async fn dispatch_loop(inner: Weak<ManagerInner>, mut rx: EventReceiver) {
    debug!("Dispatch loop started");

    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            ConnectionEvent::Message(frame) => inner.route(frame),
            ConnectionEvent::Error(e) => inner.events.emit_error(e),
            ConnectionEvent::Reconnected => inner.replay().await,
            ConnectionEvent::Closed => {
                inner.end_session().await;
                break;
            }
        }
    }

    debug!("Dispatch loop ended");
}

/// Multiplexes logical subscriptions over one streaming connection
///
/// Cheap to clone; clones share the same registry, session and counters.
///
/// # Example
/// ```ignore
/// let manager = ConnectionManager::new(Arc::new(ws), StreamConfig::default());
/// manager.connect().await?;
/// let id = manager
///     .subscribe("trades", json!({"op": "subscribe", "channel": "trades"}), |msg| {
///         println!("{}", msg);
///         Ok(())
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Manager routing on the `channel` field of inbound frames
    pub fn new(connection: Arc<dyn Connection>, config: StreamConfig) -> Self {
        Self::with_channel_extractor(connection, config, channel_field)
    }

    /// Manager with an exchange-specific channel extractor
    pub fn with_channel_extractor<F>(
        connection: Arc<dyn Connection>,
        config: StreamConfig,
        extractor: F,
    ) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ManagerInner {
                connection,
                registry: Mutex::new(SubscriptionRegistry::new()),
                wire: tokio::sync::Mutex::new(()),
                session: tokio::sync::Mutex::new(None),
                live: AtomicBool::new(false),
                events: EventBus::new(config.event_capacity),
                dropped: Arc::new(AtomicU64::new(0)),
                extractor: Arc::new(extractor),
                config,
            }),
        }
    }

    /// Open the transport and start dispatching; no-op if already connected
    ///
    /// Subscriptions that outlived a closed transport are replayed on the
    /// new session.
    pub async fn connect(&self) -> ExchangeResult<()> {
        let mut session = self.inner.session.lock().await;
        if session.is_some() {
            debug!("Connect skipped, session already exists");
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connection.connect(tx).await?;

        let dispatch = tokio::spawn(dispatch_loop(Arc::downgrade(&self.inner), rx));
        *session = Some(Session { dispatch });
        self.inner.live.store(true, Ordering::SeqCst);
        drop(session);

        info!("Connection manager connected");
        if self.inner.registry().active_count() > 0 {
            self.inner.replay().await;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.can_send()
    }

    /// Register a callback subscription and send its payload
    ///
    /// If the transport is momentarily down the send is deferred to the
    /// replay that follows the next reconnect. `callback` runs on a worker of
    /// its own, one payload at a time, in arrival order.
    ///
    /// # Errors
    /// * `NotConnected` - `connect()` was never called (or `disconnect()` since)
    /// * `SubscriptionFailed` - the payload could not be sent; nothing stays registered
    pub async fn subscribe<F>(
        &self,
        channel: &str,
        subscribe_message: Value,
        callback: F,
    ) -> ExchangeResult<SubscriptionId>
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId::generate(channel);
        let feed = spawn_callback_worker(id.clone(), handler(callback), self.inner.events.clone());
        let subscription = Subscription {
            id,
            channel: channel.to_string(),
            subscribe_message,
            unsubscribe_message: None,
            delivery: Delivery::Callback(feed),
            active: true,
        };
        self.register(subscription).await
    }

    pub(crate) async fn register(&self, subscription: Subscription) -> ExchangeResult<SubscriptionId> {
        let _wire = self.inner.wire.lock().await;

        if !self.inner.live.load(Ordering::SeqCst) {
            return Err(ExchangeError::NotConnected(format!(
                "cannot subscribe to '{}' before connect()",
                subscription.channel
            )));
        }

        let id = subscription.id.clone();
        let channel = subscription.channel.clone();
        let message = subscription.subscribe_message.clone();

        let inserted = self.inner.registry().insert(subscription);
        if !inserted {
            warn!(subscription_id = %id, channel = %channel, "Duplicate subscription id rejected");
            return Err(ExchangeError::SubscriptionFailed {
                channel,
                reason: format!("subscription id {} already registered", id),
            });
        }

        if self.inner.connection.is_connected() {
            debug!(subscription_id = %id, payload = %redact_payload(&message), "Sending subscribe");
            if let Err(e) = self.inner.connection.send(&message).await {
                self.inner.deregister(&id);
                warn!(subscription_id = %id, channel = %channel, error = %e, "Subscribe send failed");
                return Err(ExchangeError::SubscriptionFailed {
                    channel,
                    reason: e.to_string(),
                });
            }
        } else {
            debug!(subscription_id = %id, channel = %channel, "Transport down, subscribe deferred to replay");
        }

        info!(subscription_id = %id, channel = %channel, "Subscribed");
        self.inner.events.emit(ManagerEvent::Subscribed(SubscriptionInfo {
            id: id.clone(),
            channel,
            active: true,
        }));
        Ok(id)
    }

    /// Remove a subscription, then send `unsubscribe_message` (or the one
    /// stored at subscribe time) if the transport is up
    ///
    /// Never fails: unknown ids are a no-op, and a failed teardown send is
    /// reported as an error event while local removal still stands.
    pub async fn unsubscribe(&self, id: &SubscriptionId, unsubscribe_message: Option<Value>) {
        let Some(subscription) = self.inner.deregister(id) else {
            debug!(subscription_id = %id, "Unsubscribe of unknown id ignored");
            return;
        };

        if let Some(message) = unsubscribe_message.or(subscription.unsubscribe_message) {
            self.inner
                .send_teardown(id, &subscription.channel, message)
                .await;
        }

        info!(subscription_id = %id, channel = %subscription.channel, "Unsubscribed");
        self.inner.events.emit(ManagerEvent::Unsubscribed(id.clone()));
    }

    /// Unsubscribe every active subscription
    pub async fn unsubscribe_all(&self) {
        let ids = self.inner.registry().active_ids();
        for id in ids {
            self.unsubscribe(&id, None).await;
        }
    }

    /// Hard local reset: close the transport and clear the registry
    /// without sending any teardown payloads
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;
        self.inner.live.store(false, Ordering::SeqCst);

        if let Some(session) = session.take() {
            session.dispatch.abort();
            self.inner.connection.disconnect().await;
        }

        let drained = {
            let _wire = self.inner.wire.lock().await;
            self.inner.registry().drain()
        };
        for subscription in &drained {
            subscription.delivery.close();
        }

        info!(cleared = drained.len(), "Connection manager disconnected");
    }

    /// Lazy pull-based stream of the messages routed to `channel`
    ///
    /// Nothing is sent until the stream is first polled.
    pub fn watch(
        &self,
        channel: &str,
        subscribe_message: Value,
        unsubscribe_message: Option<Value>,
    ) -> WatchStream {
        WatchStream::new(self.clone(), channel, subscribe_message, unsubscribe_message)
    }

    pub(crate) fn new_watch_queue(&self) -> WatchQueue {
        WatchQueue::new(
            self.inner.config.watch_queue_capacity,
            Arc::clone(&self.inner.dropped),
        )
    }

    /// Synchronous cancellation path of a dropped watch stream
    pub(crate) fn cancel_watch(&self, id: &SubscriptionId) {
        let Some(subscription) = self.inner.deregister(id) else {
            return;
        };
        info!(subscription_id = %id, channel = %subscription.channel, "Watch cancelled");
        self.inner.events.emit(ManagerEvent::Unsubscribed(id.clone()));

        let Subscription {
            channel,
            unsubscribe_message,
            ..
        } = subscription;
        let Some(message) = unsubscribe_message else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let id = id.clone();
                handle.spawn(async move {
                    inner.send_teardown(&id, &channel, message).await;
                });
            }
            Err(_) => {
                warn!(subscription_id = %id, "No runtime to send teardown, skipped");
            }
        }
    }

    /// Observe manager events
    pub fn events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    /// Number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner.registry().active_count()
    }

    /// Read-only snapshot of active subscriptions, in registry order
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let registry = self.inner.registry();
        registry
            .active_ids()
            .iter()
            .filter_map(|id| registry.get(id).map(Subscription::info))
            .collect()
    }

    /// Messages discarded by bounded watch queues since the last reset
    pub fn dropped_message_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn reset_dropped_message_count(&self) {
        self.inner.dropped.store(0, Ordering::Relaxed);
    }
}
