//! Resilient RPC caller
//!
//! Every remote call goes through here: a rate-limiter slot is taken before
//! each attempt, retryable failures back off exponentially (1s, 2s, 4s with
//! the default policy) and fatal failures propagate on the first attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::rpc::rate_limiter::RateLimiter;

/// Retry policy for retryable failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.base_delay * 2u32.saturating_pow(self.max_attempts),
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Rate-limited, retrying wrapper around remote operations
pub struct ResilientCaller {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl ResilientCaller {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` under the rate limiter with retry on transient errors
    ///
    /// Sleeps after every retryable failure, including the last one, so a
    /// call that never succeeds costs the full backoff schedule before
    /// `MaxRetriesExceeded` surfaces.
    pub async fn call<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(label, true, operation).await
    }

    /// Like [`call`](Self::call) for writes: a timed-out attempt may still
    /// land on chain, so a timeout is returned instead of replayed
    pub async fn call_write<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(label, false, operation).await
    }

    async fn run<T, F, Fut>(&self, label: &str, replay_timeouts: bool, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut schedule = self.policy.schedule();
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.policy.max_attempts {
            self.limiter.wait_for_slot().await;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && (replay_timeouts || !e.is_timeout()) => {
                    let delay = schedule.next_backoff().unwrap_or(self.policy.base_delay);
                    warn!(
                        "{} failed (attempt {}/{}): {} - retrying in {}ms",
                        label,
                        attempt,
                        self.policy.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!("{} failed with non-retryable error: {}", label, e);
                    return Err(e);
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        error!(
            "{} exhausted {} attempts: {}",
            label, self.policy.max_attempts, last
        );
        Err(Error::MaxRetriesExceeded {
            attempts: self.policy.max_attempts,
            last,
        })
    }
}
