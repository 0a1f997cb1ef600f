//! perp_hub - shared real-time core for perpetual-exchange clients
//!
//! - One streaming connection multiplexed into many logical subscriptions
//! - Automatic resubscription after the transport reconnects
//! - Pull-based `watch` streams with an observable overflow policy
//! - A weighted token-bucket governor consulted before every REST call

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;

pub use error::AppError;
