//! Sliding-window rate limiter for outbound node calls
//!
//! Keeps the timestamps of recent calls and makes callers wait until a new
//! call fits inside `max_requests` per `window`. Waiters are served in the
//! order they arrived because the tokio mutex is fair and is held across
//! the wait.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;

/// Rolling-window limiter shared by every RPC caller
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_requests.max(1))),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_requests,
            Duration::from_millis(config.window_ms),
        )
    }

    /// Wait until issuing one more call stays within the limit, then record it
    pub async fn wait_for_slot(&self) {
        let mut calls = self.calls.lock().await;

        loop {
            let now = Instant::now();
            while let Some(oldest) = calls.front() {
                if now.duration_since(*oldest) >= self.window {
                    calls.pop_front();
                } else {
                    break;
                }
            }

            if calls.len() < self.max_requests {
                calls.push_back(now);
                return;
            }

            let Some(oldest) = calls.front().copied() else {
                continue;
            };
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            debug!("Rate limit reached, waiting {}ms for a slot", wait.as_millis());
            sleep(wait).await;
        }
    }

    /// Calls recorded inside the current window
    pub async fn in_flight(&self) -> usize {
        let calls = self.calls.lock().await;
        let now = Instant::now();
        calls
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_burst_is_immediate() {
        let limiter = RateLimiter::new(3, Duration::from_millis(1000));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.wait_for_slot().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_calls_take_three_windows() {
        let limiter = RateLimiter::new(3, Duration::from_millis(1000));
        let start = Instant::now();

        for _ in 0..10 {
            limiter.wait_for_slot().await;
        }

        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert!(start.elapsed() < Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_limit() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_millis(1000)));
        let start = Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.wait_for_slot().await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap());
        }

        let late = finished
            .iter()
            .filter(|t| t.duration_since(start) >= Duration::from_millis(1000))
            .count();
        assert_eq!(late, 3);
    }
}
