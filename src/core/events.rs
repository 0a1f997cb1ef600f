//! Connection manager events
//!
//! Typed replacement for string-keyed emitter events. Observers receive
//! them through a `tokio::broadcast` channel; a lagging observer loses the
//! oldest events but never slows down routing.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::adapters::errors::ExchangeError;

use super::subscription::{Payload, SubscriptionId, SubscriptionInfo};

/// Everything a manager reports to observers
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A subscription was registered
    Subscribed(SubscriptionInfo),
    /// A subscription was removed
    Unsubscribed(SubscriptionId),
    /// An inbound frame carrying a channel identifier
    Message { channel: String, payload: Payload },
    /// Transport error, failed teardown send, failed replay send or handler failure
    Error(Arc<ExchangeError>),
    /// Subscriptions were replayed on a new session
    Reconnected,
}

impl ManagerEvent {
    /// Short name for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ManagerEvent::Subscribed(_) => "subscribed",
            ManagerEvent::Unsubscribed(_) => "unsubscribed",
            ManagerEvent::Message { .. } => "message",
            ManagerEvent::Error(_) => "error",
            ManagerEvent::Reconnected => "reconnected",
        }
    }
}

/// Broadcast fan-out for manager events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.tx.subscribe()
    }

    /// Publish to current observers; with none listening the event is dropped
    pub fn emit(&self, event: ManagerEvent) {
        tracing::trace!(kind = event.kind(), observers = self.tx.receiver_count(), "Manager event");
        let _ = self.tx.send(event);
    }

    pub fn emit_error(&self, error: ExchangeError) {
        tracing::warn!(error = %error, "Manager error event");
        self.emit(ManagerEvent::Error(Arc::new(error)));
    }
}
