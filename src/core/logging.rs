//! Structured logging setup for perp_hub
//!
//! - JSON output by default, human-readable with `LOG_FORMAT=pretty`
//! - Level filter from `RUST_LOG`
//! - Redaction helpers for keys, tokens and outbound payloads
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `perp_hub=info` | Log level filter (standard tracing format) |
//! | `LOG_FORMAT` | `json` | Output format: `json` or `pretty` |
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use perp_hub::core::logging::{init_logging, sanitize};
//!
//! init_logging();
//! tracing::info!(api_key = %sanitize(&key), "REST client ready");
//! // api_key = "sk-1...REDACTED"
//! ```

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing_subscriber::{fmt as ts_fmt, fmt::format::FmtSpan, prelude::*, EnvFilter};

/// Set once the global subscriber is installed
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Default log level when RUST_LOG is not set
pub const DEFAULT_LOG_LEVEL: &str = "perp_hub=info";

/// Field names whose values never reach the logs in clear
///
/// Matching is case-insensitive on substrings, so `X-API-KEY` and
/// `apiKey` style names are caught through `api_key`/`apikey` variants.
pub const SENSITIVE_FIELD_PATTERNS: &[&str] = &[
    "api_key",
    "apikey",
    "private_key",
    "secret",
    "signature",
    "password",
    "token",
    "credential",
    "auth",
];

const REDACTED: &str = "REDACTED";

/// Redacting wrapper for secrets passed to `tracing` fields
///
/// Values longer than 8 characters keep their first 4 characters; shorter
/// values are fully redacted.
#[derive(Clone)]
pub struct SanitizedValue<'a>(&'a str);

impl<'a> SanitizedValue<'a> {
    pub fn new(value: &'a str) -> Self {
        Self(value)
    }

    /// The raw value. For authentication only, never for logging.
    pub fn expose(&self) -> &str {
        self.0
    }
}

impl fmt::Display for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.chars().count() > 8 {
            let prefix: String = self.0.chars().take(4).collect();
            write!(f, "{}...{}", prefix, REDACTED)
        } else {
            f.write_str(REDACTED)
        }
    }
}

impl fmt::Debug for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SanitizedValue(***)")
    }
}

/// Shorthand for `SanitizedValue::new(value)`
pub fn sanitize(value: &str) -> SanitizedValue<'_> {
    SanitizedValue::new(value)
}

/// True if a field name looks like it carries a secret
pub fn is_sensitive_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase().replace('-', "_");
    SENSITIVE_FIELD_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Copy of a JSON payload with every sensitive field's value redacted
///
/// Used before subscribe/REST payloads are written to debug logs.
pub fn redact_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_sensitive_field(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_payload(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_payload).collect()),
        other => other.clone(),
    }
}

/// Output format of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// `pretty` (any case) selects Pretty; anything else is JSON
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level filter, e.g. `perp_hub=debug,perp_hub::core::rate_limit=trace`
    pub level_filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level_filter: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LoggingConfig {
    /// Read `RUST_LOG` and `LOG_FORMAT`
    pub fn from_env() -> Self {
        Self {
            level_filter: env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
            format: env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
        }
    }
}

/// Install the global subscriber from environment; later calls are no-ops
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::from_env());
}

/// Install the global subscriber; later calls are no-ops
///
/// An unparsable level filter falls back to [`DEFAULT_LOG_LEVEL`].
pub fn init_logging_with_config(config: LoggingConfig) {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let env_filter = EnvFilter::try_new(&config.level_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                ts_fmt::layer()
                    .pretty()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                ts_fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true)
                    .with_current_span(true),
            )
            .with(env_filter)
            .try_init(),
    };

    // Another subscriber (e.g. a test harness) got there first
    if installed.is_err() {
        LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
    }
}
