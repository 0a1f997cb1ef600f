//! Configuration types for the streaming client
//!
//! This module defines all configuration structs that are loaded from YAML:
//! transport endpoint and reconnect policy, stream buffering, the request
//! governor budget, and the channels the binary watches on startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::shared::ReconnectConfig;
use crate::error::AppError;

use super::constants;

// ============================================================================
// Configuration Structs
// ============================================================================

/// Streaming transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Backoff policy applied after the session drops
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Connection manager buffering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bound of each watch queue; `None` keeps queues unbounded
    #[serde(default = "constants::watch_queue_capacity")]
    pub watch_queue_capacity: Option<usize>,
    /// Capacity of the manager event broadcast channel
    #[serde(default = "constants::event_channel_capacity")]
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            watch_queue_capacity: constants::watch_queue_capacity(),
            event_capacity: constants::event_channel_capacity(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.event_capacity == 0 {
            return Err(AppError::Config(
                "stream.event_capacity must be > 0".to_string(),
            ));
        }
        if self.watch_queue_capacity == Some(0) {
            return Err(AppError::Config(
                "stream.watch_queue_capacity must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Token-bucket budget shared by every REST call of one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity (maximum burst)
    pub max_tokens: f64,
    /// Tokens added per second
    pub refill_rate: f64,
    /// Window the budget was derived from (informational)
    #[serde(default)]
    pub window_ms: u64,
    /// Endpoint name -> token cost; unlisted endpoints cost 1
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

impl RateLimitConfig {
    /// Budget of `max_requests` per `window_ms`, burstable up to `max_requests`
    pub fn per_window(max_requests: u32, window_ms: u64) -> Self {
        let max_tokens = f64::from(max_requests);
        Self {
            max_tokens,
            refill_rate: max_tokens * 1000.0 / window_ms as f64,
            window_ms,
            weights: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, endpoint: impl Into<String>, cost: f64) -> Self {
        self.weights.insert(endpoint.into(), cost);
        self
    }

    /// Reject budgets that could never grant a request
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.max_tokens.is_finite() || self.max_tokens < 1.0 {
            return Err(AppError::Config(format!(
                "rate_limit.max_tokens must be a finite number >= 1 (got {})",
                self.max_tokens
            )));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(AppError::Config(format!(
                "rate_limit.refill_rate must be a finite number > 0 (got {})",
                self.refill_rate
            )));
        }
        for (endpoint, cost) in &self.weights {
            if !cost.is_finite() || *cost < 0.0 {
                return Err(AppError::Config(format!(
                    "rate_limit weight for '{}' must be a finite number >= 0 (got {})",
                    endpoint, cost
                )));
            }
            if *cost > self.max_tokens {
                return Err(AppError::Config(format!(
                    "rate_limit weight for '{}' ({}) exceeds max_tokens ({})",
                    endpoint, cost, self.max_tokens
                )));
            }
        }
        Ok(())
    }
}

/// One channel the binary watches on startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: String,
    /// Payload sent verbatim to subscribe
    pub subscribe: Value,
    /// Payload sent verbatim on teardown
    #[serde(default)]
    pub unsubscribe: Option<Value>,
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub subscriptions: Vec<ChannelConfig>,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        let url = self.connection.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "connection.url must use ws:// or wss:// (got '{}')",
                self.connection.url
            )));
        }

        if self.connection.reconnect.max_attempts == 0 {
            return Err(AppError::Config(
                "connection.reconnect.max_attempts must be > 0".to_string(),
            ));
        }

        self.stream.validate()?;
        self.rate_limit.validate()?;

        let mut seen = std::collections::HashSet::new();
        for (i, sub) in self.subscriptions.iter().enumerate() {
            if !seen.insert(sub.channel.as_str()) {
                return Err(AppError::Config(format!(
                    "subscriptions[{}]: duplicate channel '{}'",
                    i, sub.channel
                )));
            }
            if sub.channel.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "subscriptions[{}]: channel cannot be empty",
                    i
                )));
            }
            if sub.subscribe.is_null() {
                return Err(AppError::Config(format!(
                    "subscriptions[{}] ('{}'): subscribe payload is required",
                    i, sub.channel
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_window_derives_refill_rate() {
        let config = RateLimitConfig::per_window(1200, 60_000);
        assert_eq!(config.max_tokens, 1200.0);
        assert!((config.refill_rate - 20.0).abs() < f64::EPSILON);
        assert_eq!(config.window_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_weight_above_capacity_is_rejected() {
        let config = RateLimitConfig::per_window(10, 1000).with_weight("bulk_cancel", 11.0);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("exceeds max_tokens"), "Got: {}", err);
    }

    #[test]
    fn test_weight_equal_to_capacity_is_allowed() {
        let config = RateLimitConfig::per_window(10, 1000).with_weight("bulk_cancel", 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let config = RateLimitConfig::per_window(10, 0);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("refill_rate"), "Got: {}", err);
    }

    #[test]
    fn test_capacity_below_default_weight_is_rejected() {
        let config = RateLimitConfig {
            max_tokens: 0.5,
            refill_rate: 1.0,
            window_ms: 1000,
            weights: HashMap::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        let config = RateLimitConfig::per_window(10, 1000).with_weight("ping", -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_config_rejects_zero_queue() {
        let config = StreamConfig {
            watch_queue_capacity: Some(0),
            event_capacity: 16,
        };
        assert!(config.validate().is_err());
    }
}
