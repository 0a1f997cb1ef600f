//! Runtime defaults with environment variable overrides
//!
//! Centralizes the tunables of the streaming layer and the REST client so
//! they can be adjusted per deployment without touching YAML.

use std::time::Duration;

// =============================================================================
// Streaming
// =============================================================================

/// Capacity of the manager event broadcast channel (default: 256 events)
///
/// Environment variable: `EVENT_CHANNEL_CAPACITY`
pub fn event_channel_capacity() -> usize {
    std::env::var("EVENT_CHANNEL_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(256)
}

/// Per-watch queue bound (default: unset = unbounded)
///
/// Environment variable: `WATCH_QUEUE_CAPACITY`
pub fn watch_queue_capacity() -> Option<usize> {
    std::env::var("WATCH_QUEUE_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
}

// =============================================================================
// REST
// =============================================================================

/// Total timeout of one governed HTTP request (default: 5000ms)
///
/// Environment variable: `HTTP_TIMEOUT_MS`
pub fn http_timeout() -> Duration {
    let ms = std::env::var("HTTP_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);
    Duration::from_millis(ms)
}

/// Config file used by the binary when no path argument is given
///
/// Environment variable: `PERP_HUB_CONFIG`
pub fn config_path() -> String {
    std::env::var("PERP_HUB_CONFIG").unwrap_or_else(|_| "config.yaml".to_string())
}
