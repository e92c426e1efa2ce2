//! Retry and backoff
//!
//! Used for the post-timeout re-query: a timed-out sign or submit is
//! ambiguous, so the joiner re-reads session state a bounded number of times
//! before reporting the timeout.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase: delay * (attempt + 1)
    Linear,
    /// Exponential increase: delay * 2^attempt
    Exponential,
    /// Exponential plus up to 10% random jitter
    ExponentialWithJitter,
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (0 = first retry), capped at `max_delay`
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Duration {
        let delay = match self {
            Self::Fixed => initial_delay,
            Self::Linear => initial_delay.saturating_mul(attempt.saturating_add(1)),
            Self::Exponential => initial_delay.saturating_mul(2u32.saturating_pow(attempt)),
            Self::ExponentialWithJitter => {
                let base = initial_delay.saturating_mul(2u32.saturating_pow(attempt));
                let jitter = rand::thread_rng().gen::<f64>();
                let jitter_ms = (base.as_millis() as f64 * 0.1 * jitter) as u64;
                base.saturating_add(Duration::from_millis(jitter_ms))
            }
        };
        delay.min(max_delay)
    }
}

/// Bounded retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Total attempts including the first (0 behaves like 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    /// Cap on any single delay
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::ExponentialWithJitter,
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy with a fixed delay
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
        }
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay before retry number `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.strategy
            .calculate_delay(attempt, self.initial_delay, self.max_delay)
    }

    /// Run `operation` until it yields `Some`, sleeping between attempts.
    ///
    /// Errors count as an empty attempt. Returns `None` when attempts run out.
    pub async fn poll_until<T, E, F, Fut>(&self, mut operation: F) -> Option<T>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.calculate_delay(attempt - 1)).await;
            }
            match operation(attempt).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => tracing::debug!(attempt, "re-query found nothing yet"),
                Err(e) => tracing::debug!(attempt, error = %e, "re-query failed"),
            }
        }
        None
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
