// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Command retry policy.
//!
//! Exponential backoff with proportional jitter. The policy never decides on
//! its own what is retryable: callers pass a classifier, and a `false` from it
//! stops the loop on the spot. Sleep and jitter are injectable so tests run
//! without wall-clock delays.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::domain::node_config::RetryConfig;

/// Upper bound on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Suspends only the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns a sample in `[0, 1)`.
pub type JitterSource = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Number of times the work function ran, including the successful one.
    pub attempts: u32,
}

#[derive(Clone)]
pub struct CommandRetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_factor: f64,
    jitter_ratio: f64,
    sleeper: Arc<dyn Sleeper>,
    jitter: JitterSource,
}

impl CommandRetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64, jitter_ratio: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor,
            jitter_ratio,
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(rand::random::<f64>),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.backoff_factor,
            config.jitter_ratio,
        )
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterSource) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after failed attempt `attempt` (1-based):
    /// `base * factor^(attempt-1)`, scaled by `1 ± jitter_ratio` and capped
    /// at [`MAX_RETRY_DELAY`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let nominal = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let spread = ((self.jitter)() * 2.0 - 1.0) * self.jitter_ratio;
        Duration::try_from_secs_f64((nominal * (1.0 + spread)).max(0.0))
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }

    /// Runs `work(attempt)` until it succeeds, the classifier declares the
    /// error non-retryable, or attempts are exhausted. The last error is
    /// returned unchanged.
    pub async fn retry_with_backoff<T, E, F, Fut, C>(&self, classifier: C, mut work: F) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match work(attempt).await {
                Ok(value) => return Ok(RetryOutcome { value, attempts: attempt }),
                Err(e) => {
                    if !classifier(&e) || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "Attempt {}/{} failed, retrying in {:?}: {}",
                        attempt, self.max_attempts, delay, e
                    );
                    metrics::counter!("aegis_distributed_retries_total").increment(1);
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for CommandRetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
