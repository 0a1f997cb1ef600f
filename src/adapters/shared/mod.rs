//! Transport plumbing shared by every exchange connection

pub mod reconnect;
pub mod websocket;

pub use reconnect::{reconnect_with_backoff, ReconnectConfig};
pub use websocket::{connect_tls, TlsWebSocketStream, WsConnection};
