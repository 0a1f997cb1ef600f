//! Exchange-facing plumbing: the transport contract, a WebSocket
//! implementation of it, and a governed REST client.

pub mod errors;
pub mod rest;
pub mod shared;
pub mod traits;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types for convenience
pub use errors::{ExchangeError, ExchangeResult};
pub use rest::RestClient;
pub use shared::{ReconnectConfig, WsConnection};
pub use traits::{Connection, ConnectionEvent, EventReceiver, EventSender};
