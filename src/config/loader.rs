//! Configuration loader for YAML files
//!
//! This module handles loading and validating configuration from YAML files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::AppError;

use super::types::AppConfig;

/// Load configuration from a YAML file
///
/// This function:
/// 1. Checks if the file exists
/// 2. Parses the YAML content
/// 3. Validates the configuration rules
///
/// # Example
/// ```ignore
/// use std::path::Path;
/// use perp_hub::config::load_config;
///
/// let config = load_config(Path::new("config.yaml"))?;
/// ```
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let config: AppConfig = serde_yaml::from_reader(reader).map_err(|e| {
        AppError::Config(format!("YAML parse error in '{}': {}", path.display(), e))
    })?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing)
pub fn load_config_from_str(yaml_content: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = serde_yaml::from_str(yaml_content)
        .map_err(|e| AppError::Config(format!("YAML parse error: {}", e)))?;

    config.validate()?;

    Ok(config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG_YAML: &str = r#"
connection:
  url: wss://stream.example.exchange/ws
  reconnect:
    max_attempts: 8
    initial_delay_ms: 250
    max_delay_ms: 8000
stream:
  watch_queue_capacity: 1000
  event_capacity: 64
rate_limit:
  max_tokens: 20
  refill_rate: 10
  window_ms: 1000
  weights:
    place_order: 2
    cancel_all: 5
subscriptions:
  - channel: orderbook
    subscribe: { type: subscribe, channel: orderbook, market: BTC-PERP }
    unsubscribe: { type: unsubscribe, channel: orderbook, market: BTC-PERP }
  - channel: trades
    subscribe: { type: subscribe, channel: trades }
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let config = load_config_from_str(VALID_CONFIG_YAML).unwrap();
        assert_eq!(config.connection.url, "wss://stream.example.exchange/ws");
        assert_eq!(config.connection.reconnect.max_attempts, 8);
        assert_eq!(config.stream.watch_queue_capacity, Some(1000));
        assert_eq!(config.stream.event_capacity, 64);
        assert_eq!(config.rate_limit.weights.get("cancel_all"), Some(&5.0));
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(
            config.subscriptions[0].subscribe,
            json!({"type": "subscribe", "channel": "orderbook", "market": "BTC-PERP"})
        );
        assert!(config.subscriptions[1].unsubscribe.is_none());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let yaml = r#"
connection:
  url: ws://localhost:9000
rate_limit:
  max_tokens: 5
  refill_rate: 1
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.connection.reconnect, Default::default());
        assert!(config.subscriptions.is_empty());
        assert!(config.rate_limit.weights.is_empty());
        assert_eq!(config.rate_limit.window_ms, 0);
    }

    #[test]
    fn test_load_config_from_str_invalid_yaml() {
        let result = load_config_from_str("invalid: yaml: content: [");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_load_config_rejects_http_url() {
        let yaml = r#"
connection:
  url: https://api.example.exchange
rate_limit:
  max_tokens: 5
  refill_rate: 1
"#;
        let err = load_config_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("ws:// or wss://"), "Got: {}", err);
    }

    #[test]
    fn test_load_config_rejects_weight_above_capacity() {
        let yaml = r#"
connection:
  url: wss://stream.example.exchange/ws
rate_limit:
  max_tokens: 5
  refill_rate: 1
  weights:
    cancel_all: 6
"#;
        let err = load_config_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("exceeds max_tokens"), "Got: {}", err);
    }

    #[test]
    fn test_load_config_rejects_empty_channel() {
        let yaml = r#"
connection:
  url: wss://stream.example.exchange/ws
rate_limit:
  max_tokens: 5
  refill_rate: 1
subscriptions:
  - channel: " "
    subscribe: { op: sub }
"#;
        let err = load_config_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("channel cannot be empty"), "Got: {}", err);
    }

    #[test]
    fn test_load_config_rejects_duplicate_channel() {
        let yaml = r#"
connection:
  url: wss://stream.example.exchange/ws
rate_limit:
  max_tokens: 5
  refill_rate: 1
subscriptions:
  - channel: trades
    subscribe: { op: sub }
  - channel: trades
    subscribe: { op: sub, depth: 5 }
"#;
        let err = load_config_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("duplicate channel"), "Got: {}", err);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Configuration file not found"));
    }

    #[test]
    fn test_load_config_from_file_valid() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(VALID_CONFIG_YAML.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.subscriptions[0].channel, "orderbook");
    }

    #[test]
    fn test_load_config_from_file_invalid_yaml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"invalid: [yaml: content").unwrap();
        temp_file.flush().unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("YAML parse error"));
    }
}
