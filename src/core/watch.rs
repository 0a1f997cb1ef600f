//! Pull-based subscription streams
//!
//! Bridges the push-driven dispatch path to a lazily-subscribed
//! `futures::Stream`. The dispatch task only ever appends to a
//! per-subscription `WatchQueue` and wakes the consumer; it never waits on
//! a slow reader.
//!
//! # Overflow policy
//!
//! Queues are unbounded unless the manager was configured with
//! `watch_queue_capacity`. A bounded queue that is full discards its
//! **oldest** message to admit the new one, and every discarded message
//! increments the owning manager's dropped counter exactly once. Order of
//! the surviving messages is never changed.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream};
use serde_json::Value;

use crate::adapters::errors::ExchangeResult;

use super::manager::ConnectionManager;
use super::subscription::{Delivery, Payload, Subscription, SubscriptionId};

#[derive(Debug, Default)]
struct QueueState {
    buf: VecDeque<Payload>,
    waker: Option<Waker>,
    closed: bool,
}

/// Per-subscription message queue feeding one `WatchStream`
#[derive(Debug)]
pub struct WatchQueue {
    state: Mutex<QueueState>,
    capacity: Option<usize>,
    dropped: Arc<AtomicU64>,
}

impl WatchQueue {
    /// `capacity: None` means unbounded; `dropped` is the owner's counter
    pub fn new(capacity: Option<usize>, dropped: Arc<AtomicU64>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.map(|c| c.max(1)),
            dropped,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message, evicting the oldest ones if bounded and full.
    /// Returns false if the queue was already closed.
    pub fn push(&self, payload: Payload) -> bool {
        let waker = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            if let Some(capacity) = self.capacity {
                while state.buf.len() >= capacity {
                    state.buf.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(capacity, "Watch queue full, oldest message dropped");
                }
            }
            state.buf.push_back(payload);
            state.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Stop accepting messages; queued ones remain readable
    pub fn close(&self) {
        let waker = {
            let mut state = self.lock();
            state.closed = true;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Next message, `None` once closed and drained
    pub fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Option<Payload>> {
        let mut state = self.lock();
        if let Some(payload) = state.buf.pop_front() {
            return Poll::Ready(Some(payload));
        }
        if state.closed {
            return Poll::Ready(None);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

enum WatchState {
    /// Not polled yet; nothing registered
    Idle { subscribe_message: Value },
    /// Registration in flight
    Subscribing {
        queue: Arc<WatchQueue>,
        pending: BoxFuture<'static, ExchangeResult<SubscriptionId>>,
    },
    Active { queue: Arc<WatchQueue> },
    /// Ended, failed, or cancelled; nothing left to clean up
    Done,
}

/// Lazy, single-use stream of the messages routed to one channel
///
/// The first poll registers the subscription. Dropping the stream before it
/// ends removes the subscription synchronously and sends the teardown
/// payload in the background; [`WatchStream::close`] does the same but waits
/// for the teardown send. Either path runs exactly once.
pub struct WatchStream {
    manager: ConnectionManager,
    id: SubscriptionId,
    channel: String,
    unsubscribe_message: Option<Value>,
    state: WatchState,
}

impl WatchStream {
    pub(crate) fn new(
        manager: ConnectionManager,
        channel: &str,
        subscribe_message: Value,
        unsubscribe_message: Option<Value>,
    ) -> Self {
        Self {
            manager,
            id: SubscriptionId::generate(channel),
            channel: channel.to_string(),
            unsubscribe_message,
            state: WatchState::Idle { subscribe_message },
        }
    }

    /// Id the subscription is (or will be) registered under
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            WatchState::Subscribing { .. } | WatchState::Active { .. }
        )
    }

    /// Cancel the stream and wait for the teardown send to finish
    pub async fn close(mut self) {
        let was_live = self.is_live();
        self.state = WatchState::Done;
        if was_live {
            self.manager.unsubscribe(&self.id, None).await;
        }
    }
}

impl Stream for WatchStream {
    type Item = ExchangeResult<Payload>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match std::mem::replace(&mut this.state, WatchState::Done) {
                WatchState::Idle { subscribe_message } => {
                    let queue = Arc::new(this.manager.new_watch_queue());
                    let subscription = Subscription {
                        id: this.id.clone(),
                        channel: this.channel.clone(),
                        subscribe_message,
                        unsubscribe_message: this.unsubscribe_message.clone(),
                        delivery: Delivery::Queue(Arc::clone(&queue)),
                        active: true,
                    };
                    let manager = this.manager.clone();
                    let pending = async move { manager.register(subscription).await }.boxed();
                    this.state = WatchState::Subscribing { queue, pending };
                }
                WatchState::Subscribing { queue, mut pending } => {
                    match pending.poll_unpin(cx) {
                        Poll::Pending => {
                            this.state = WatchState::Subscribing { queue, pending };
                            return Poll::Pending;
                        }
                        Poll::Ready(Ok(_)) => {
                            this.state = WatchState::Active { queue };
                        }
                        Poll::Ready(Err(e)) => {
                            tracing::warn!(channel = %this.channel, error = %e, "Watch subscribe failed");
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
                WatchState::Active { queue } => match queue.poll_pop(cx) {
                    Poll::Ready(Some(payload)) => {
                        this.state = WatchState::Active { queue };
                        return Poll::Ready(Some(Ok(payload)));
                    }
                    // Closed by unsubscribe/disconnect elsewhere: already deregistered
                    Poll::Ready(None) => return Poll::Ready(None),
                    Poll::Pending => {
                        this.state = WatchState::Active { queue };
                        return Poll::Pending;
                    }
                },
                WatchState::Done => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        let was_live = self.is_live();
        self.state = WatchState::Done;
        if was_live {
            self.manager.cancel_watch(&self.id);
        }
    }
}
