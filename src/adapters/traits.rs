//! Streaming connection trait definition
//!
//! The Connection trait is the narrow contract the connection manager
//! consumes from a physical transport: connect, send, disconnect and a
//! stream of transport events.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::adapters::errors::{ExchangeError, ExchangeResult};

/// Signals a transport pushes to whoever owns the connection
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A decoded inbound frame
    Message(Value),
    /// Transport-level failure; recovery is the transport's own business
    Error(ExchangeError),
    /// A new session was established after a drop
    Reconnected,
    /// The transport stopped for good (closed locally or gave up reconnecting)
    Closed,
}

/// Sender half handed to a transport on `connect`
pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Receiver half drained by the connection manager's dispatch task
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Common trait for all streaming transports
///
/// Implementations own socket lifecycle and reconnect-with-backoff. After a
/// drop they must push [`ConnectionEvent::Reconnected`] once the new session
/// accepts writes, so the owner can replay its subscriptions.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
///
/// struct LoopbackConnection { connected: AtomicBool }
///
/// #[async_trait]
/// impl Connection for LoopbackConnection {
///     async fn connect(&self, events: EventSender) -> ExchangeResult<()> {
///         self.connected.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///     // ... other methods
/// }
/// ```
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open the transport and start pushing events into `events`
    ///
    /// Resolves once the transport reports connected, or with the failure.
    async fn connect(&self, events: EventSender) -> ExchangeResult<()>;

    /// Close the transport and stop any background reconnect logic
    async fn disconnect(&self);

    /// Whether the transport currently accepts writes
    fn is_connected(&self) -> bool;

    /// Write one payload to the current session
    async fn send(&self, payload: &Value) -> ExchangeResult<()>;
}
