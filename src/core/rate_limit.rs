//! Token-bucket request governor
//!
//! Every REST call asks the governor for permission under a logical endpoint
//! name before it is issued. Each endpoint costs a configured weight
//! (default 1); the bucket refills continuously at `refill_rate` tokens per
//! second up to `max_tokens`.
//!
//! The bucket sits behind a fair `tokio::sync::Mutex` that a waiting caller
//! keeps while it sleeps off its shortfall, so callers are granted in arrival
//! order and no two callers can spend the same surplus.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::config::RateLimitConfig;
use crate::error::AppError;

/// Cost of an endpoint without a configured weight
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Slack absorbing float error between a computed wait and the refill it buys
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.refill_by(elapsed);
        self.last_refill = now;
    }

    fn refill_by(&mut self, elapsed: Duration) {
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
    }

    fn try_take(&mut self, cost: f64) -> bool {
        if self.tokens + TOKEN_EPSILON >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            true
        } else {
            false
        }
    }

    /// Time until `cost` tokens are available, rounded up to the microsecond
    fn wait_for(&self, cost: f64) -> Duration {
        let shortfall = (cost - self.tokens).max(0.0);
        let micros = (shortfall / self.refill_rate * 1_000_000.0).ceil();
        Duration::from_micros(micros.max(1.0) as u64)
    }
}

/// Shared token-bucket limiter with per-endpoint weights
#[derive(Debug)]
pub struct RateGovernor {
    bucket: Mutex<TokenBucket>,
    weights: HashMap<String, f64>,
    max_tokens: f64,
    refill_rate: f64,
}

impl RateGovernor {
    /// Build a governor starting with a full bucket
    ///
    /// # Errors
    /// `AppError::Config` if the budget could never grant some request
    /// (non-positive rate, capacity below 1, or a weight above capacity).
    pub fn new(config: RateLimitConfig) -> Result<Self, AppError> {
        config.validate()?;

        Ok(Self {
            bucket: Mutex::new(TokenBucket::full(
                config.max_tokens,
                config.refill_rate,
                Instant::now(),
            )),
            weights: config.weights,
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate,
        })
    }

    /// Token cost of `endpoint`
    pub fn cost_of(&self, endpoint: &str) -> f64 {
        self.weights.get(endpoint).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Wait until `endpoint` can be afforded, then spend its cost
    ///
    /// Never fails and has no deadline; see [`RateGovernor::acquire_with_timeout`].
    /// Dropping the future before it resolves spends nothing.
    pub async fn acquire(&self, endpoint: &str) {
        let cost = self.cost_of(endpoint);
        let mut bucket = self.bucket.lock().await;

        loop {
            bucket.refill(Instant::now());
            if bucket.try_take(cost) {
                trace!(endpoint = %endpoint, cost, remaining = bucket.tokens, "Rate budget granted");
                return;
            }

            let wait = bucket.wait_for(cost);
            debug!(
                endpoint = %endpoint,
                cost,
                available = bucket.tokens,
                wait_ms = wait.as_millis() as u64,
                "Rate budget exhausted, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`RateGovernor::acquire`] but gives up after `timeout`
    ///
    /// # Errors
    /// `ExchangeError::RateLimitTimeout` if the budget was not granted in
    /// time; no tokens are spent in that case.
    pub async fn acquire_with_timeout(&self, endpoint: &str, timeout: Duration) -> ExchangeResult<()> {
        tokio::time::timeout(timeout, self.acquire(endpoint))
            .await
            .map_err(|_| ExchangeError::RateLimitTimeout {
                endpoint: endpoint.to_string(),
                waited_ms: timeout.as_millis() as u64,
            })
    }

    /// Spend the cost of `endpoint` only if affordable right now
    ///
    /// Returns false without waiting when the bucket is short or another
    /// caller is already queued on it.
    pub fn try_acquire(&self, endpoint: &str) -> bool {
        let cost = self.cost_of(endpoint);
        let Ok(mut bucket) = self.bucket.try_lock() else {
            return false;
        };
        bucket.refill(Instant::now());
        bucket.try_take(cost)
    }

    /// Current balance after refill
    pub async fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.tokens
    }
}
