//! Retry with exponential backoff for transient database failures.
//!
//! Error classification (what counts as retryable, what counts as a
//! deadlock) lives on [`Fault`] itself; this module owns the schedule and
//! the generic [`retry`] combinator the executor wraps its data transaction
//! in.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use gridsync_errors::{Fault, SyncResult};

/// Backoff schedule: attempt `n` (0-based) waits
/// `min(initial_delay * exponential_base^n, max_delay)` plus, when jitter is
/// on, a uniform draw from `[0, jitter_max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
            jitter_max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all; the first failure is final.
    pub fn none() -> Self {
        RetryPolicy { max_attempts: 1, jitter: false, ..RetryPolicy::default() }
    }

    /// The delay before re-running attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential =
            self.initial_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter && self.jitter_max > Duration::ZERO {
            rand::rng().random_range(0.0..self.jitter_max.as_secs_f64())
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Run `op` until it succeeds, the error is not retryable, or the policy's
/// attempt budget is spent. Each re-run restarts the operation from scratch.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(fault) if fault.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = what,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %fault,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(fault) => {
                if attempt > 0 {
                    warn!(
                        operation = what,
                        attempts = attempt + 1,
                        error = %fault,
                        "giving up after retries"
                    );
                }
                return Err(fault);
            }
        }
    }
}
