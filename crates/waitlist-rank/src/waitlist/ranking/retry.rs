//! Backoff and deadline helpers for the ranking engine.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::waitlist::repository::RepositoryError;

/// Retry strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// No delay between attempts
    Immediate,
    /// Fixed delay between attempts
    Fixed { delay: Duration },
    /// Doubling delay, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::Fixed { delay } => *delay,
            RetryStrategy::Exponential { initial, max } => {
                let factor = 1u32 << attempt.saturating_sub(1).min(16);
                initial.saturating_mul(factor).min(*max)
            }
        }
    }
}

/// Bounded retry for position conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        let initial = config.retry_backoff();
        Self {
            max_attempts: config.conflict_retries.max(1),
            strategy: RetryStrategy::Exponential {
                initial,
                max: initial.saturating_mul(16),
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Caller supplied time bound for one engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|instant| Instant::now() >= instant)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|instant| instant.saturating_duration_since(Instant::now()))
    }

    /// Sleeps for `delay`, clipped to the time left before the deadline.
    pub(crate) fn sleep(&self, delay: Duration) {
        let delay = match self.remaining() {
            Some(left) => delay.min(left),
            None => delay,
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Runs a repository call, retrying once after `backoff` on a transient failure.
pub(crate) fn with_transient_retry<T, F>(backoff: Duration, mut call: F) -> Result<T, RepositoryError>
where
    F: FnMut() -> Result<T, RepositoryError>,
{
    match call() {
        Err(err) if err.is_transient() => {
            tracing::warn!(error = %err, "transient repository failure, retrying once");
            thread::sleep(backoff);
            call()
        }
        other => other,
    }
}
