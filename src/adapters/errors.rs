//! Exchange adapter error types
//!
//! All transport, subscription and request-governor failures are wrapped in
//! the ExchangeError enum which implements thiserror for consistent handling.

use thiserror::Error;

/// Exchange-specific error types for connection and subscription operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Connection to exchange failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation requires a live session but the manager was never connected
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Writing a payload to the transport failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Subscription to a channel failed
    #[error("Subscription failed for {channel}: {reason}")]
    SubscriptionFailed { channel: String, reason: String },

    /// A subscription handler returned an error or panicked while routing
    #[error("Handler for {subscription_id} failed: {reason}")]
    Handler {
        subscription_id: String,
        reason: String,
    },

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    /// Rate governor could not grant budget before the caller's deadline
    #[error("Rate limit wait for '{endpoint}' exceeded {waited_ms}ms")]
    RateLimitTimeout { endpoint: String, waited_ms: u64 },

    /// Invalid or unexpected response from exchange
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP transport error (boxed to reduce enum size)
    #[error("HTTP error: {0}")]
    Http(Box<reqwest::Error>),

    /// WebSocket protocol error (boxed to reduce enum size)
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Http(Box::new(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::WebSocket(Box::new(err))
    }
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
