//! Backoff schedule for re-opening a dropped streaming session
//!
//! Delays grow exponentially from `initial_delay_ms`, are capped at
//! `max_delay_ms`, and get up to 199 ms of random jitter so clients do not
//! reconnect in lockstep after a venue-wide outage.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::errors::{ExchangeError, ExchangeResult};

/// Upper bound (exclusive) of the random jitter added to each delay
const JITTER_MS: u64 = 200;

/// Reconnect policy of one transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before the transport gives up for good
    pub max_attempts: u32,
    /// Delay before the first attempt, doubled on each following one
    pub initial_delay_ms: u64,
    /// Ceiling of the doubled delay (jitter comes on top)
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Jitter-free delay before the zero-based `attempt`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    /// Fresh schedule following this policy
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            attempt: 0,
        }
    }
}

/// Iterator over the delays of one reconnect cycle, jitter included
///
/// Yields `max_attempts` delays, then `None`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let jitter = Duration::from_millis(rand::random::<u64>() % JITTER_MS);
        let delay = self.config.base_delay(self.attempt) + jitter;
        self.attempt += 1;
        Some(delay)
    }
}

/// Run `open` after each delay of the schedule until it succeeds
///
/// The first attempt is already delayed: this is reached right after a drop,
/// when an instant retry mostly hits the same failure.
///
/// # Errors
/// The error of the final attempt once the schedule is exhausted, or
/// `ConnectionFailed` if `max_attempts` is 0.
///
/// # Example
/// ```ignore
/// reconnect_with_backoff(&ReconnectConfig::default(), "wss://venue/ws", || async {
///     open_session().await
/// })
/// .await?;
/// ```
pub async fn reconnect_with_backoff<F, Fut>(
    config: &ReconnectConfig,
    target: &str,
    mut open: F,
) -> ExchangeResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<()>>,
{
    let mut failure = None;

    for (index, delay) in config.backoff().enumerate() {
        let attempt = index + 1;
        tracing::info!(
            target_url = %target,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect attempt scheduled"
        );
        tokio::time::sleep(delay).await;

        match open().await {
            Ok(()) => {
                tracing::info!(target_url = %target, attempt, "Reconnected");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(target_url = %target, attempt, error = %e, "Reconnect attempt failed");
                failure = Some(e);
            }
        }
    }

    Err(failure.unwrap_or_else(|| {
        ExchangeError::ConnectionFailed(format!("no reconnect attempts allowed for {}", target))
    }))
}
