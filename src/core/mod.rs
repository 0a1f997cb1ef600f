//! Core module - connection manager, subscriptions, watch streams, rate governor, logging
//!
//! This module uses **explicit re-exports** instead of glob exports
//! (`pub use module::*`) so the public API only changes on purpose.
//!
//! ## Usage
//! ```ignore
//! use perp_hub::core::{ConnectionManager, ManagerEvent, RateGovernor};
//! ```

pub mod events;
pub mod logging;
pub mod manager;
pub mod rate_limit;
pub mod subscription;
pub mod watch;

// Explicit re-exports for manager module
pub use manager::{channel_field, ChannelExtractor, ConnectionManager};

// Explicit re-exports for events module
pub use events::{EventBus, ManagerEvent};

// Explicit re-exports for subscription module
pub use subscription::{handler, Handler, Payload, SubscriptionId, SubscriptionInfo};

// Explicit re-exports for watch module
pub use watch::{WatchQueue, WatchStream};

// Explicit re-exports for rate_limit module
pub use rate_limit::{RateGovernor, DEFAULT_WEIGHT};

// Explicit re-exports for logging module
pub use logging::{
    init_logging, init_logging_with_config, redact_payload, sanitize, LogFormat, LoggingConfig,
    SanitizedValue, DEFAULT_LOG_LEVEL, SENSITIVE_FIELD_PATTERNS,
};
