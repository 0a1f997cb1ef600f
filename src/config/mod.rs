//! Configuration module for client settings and YAML loading
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `ConnectionConfig`, `StreamConfig`, `RateLimitConfig`)
//! - YAML loading functionality (`load_config`)
//! - Runtime defaults with environment variable overrides

pub mod constants;
mod loader;
mod types;

// Re-export types
pub use types::{AppConfig, ChannelConfig, ConnectionConfig, RateLimitConfig, StreamConfig};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};
