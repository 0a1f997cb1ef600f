//! Shared test utilities for connection-layer testing
//!
//! Provides a configurable `MockConnection` that records every payload sent
//! and lets tests inject inbound frames, transport errors, session drops,
//! reconnects and terminal closes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::traits::{Connection, ConnectionEvent, EventSender};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory transport for manager tests
#[derive(Default)]
pub struct MockConnection {
    /// Whether the transport currently accepts writes
    pub connected: AtomicBool,
    /// When true, `connect` fails
    pub fail_connect: AtomicBool,
    /// When true, every `send` fails
    pub fail_sends: AtomicBool,
    /// Number of `connect` calls
    pub connect_calls: AtomicUsize,
    /// Number of `disconnect` calls
    pub disconnect_calls: AtomicUsize,
    /// Payloads whose `send` fails
    failing_payloads: Mutex<Vec<Value>>,
    sent: Mutex<Vec<Value>>,
    events: Mutex<Option<EventSender>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every payload sent successfully, in order
    pub fn sent(&self) -> Vec<Value> {
        lock(&self.sent).clone()
    }

    pub fn sent_count_of(&self, payload: &Value) -> usize {
        lock(&self.sent).iter().filter(|p| *p == payload).count()
    }

    pub fn clear_sent(&self) {
        lock(&self.sent).clear();
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make sends of exactly this payload fail
    pub fn fail_payload(&self, payload: Value) {
        lock(&self.failing_payloads).push(payload);
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Simulate an inbound frame
    pub fn push_message(&self, payload: Value) {
        self.emit(ConnectionEvent::Message(payload));
    }

    /// Simulate a transport-level error
    pub fn push_error(&self, error: ExchangeError) {
        self.emit(ConnectionEvent::Error(error));
    }

    /// Simulate the session dropping while the transport retries
    pub fn drop_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Simulate the transport giving up for good
    pub fn push_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(ConnectionEvent::Closed);
    }

    /// Simulate the transport re-establishing a session
    pub fn restore_session(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.emit(ConnectionEvent::Reconnected);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn connect(&self, events: EventSender) -> ExchangeResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ExchangeError::ConnectionFailed("mock refused".into()));
        }
        *lock(&self.events) = Some(events);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *lock(&self.events) = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: &Value) -> ExchangeResult<()> {
        if !self.is_connected() {
            return Err(ExchangeError::NotConnected("mock session down".into()));
        }
        if self.fail_sends.load(Ordering::SeqCst) || lock(&self.failing_payloads).contains(payload)
        {
            return Err(ExchangeError::SendFailed("mock send failure".into()));
        }
        lock(&self.sent).push(payload.clone());
        Ok(())
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
