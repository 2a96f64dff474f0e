//! Retry wrapper for a whole network run.
//!
//! Only throttling errors are retried. Before each retry the caller is told
//! which attempt comes next and how long the wait is, so it can surface a
//! "retrying" note to pollers before the sleep starts.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::core::backoff::BackoffPolicy;
use crate::core::error::RunError;

/// Blocks the current thread between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Reported before sleeping ahead of attempt `attempt`.
#[derive(Debug, Clone)]
pub struct RetryNotice<'a> {
    /// The attempt about to be made (2-indexed at the earliest).
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    /// `delay` without jitter.
    pub base_delay: Duration,
    pub error: &'a RunError,
}

impl RetryNotice<'_> {
    /// Human-readable note for pollers.
    pub fn note(&self) -> String {
        format!(
            "Rate limited by the model provider; retrying in {}s (attempt {}/{}).",
            self.delay.as_secs_f64().ceil() as u64,
            self.attempt,
            self.max_attempts
        )
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// `op` receives the 1-indexed attempt number. Exhaustion yields
/// [`RunError::RetriesExhausted`] wrapping the last transient error.
pub fn with_retry<T>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    mut on_retry: impl FnMut(&RetryNotice<'_>),
    mut op: impl FnMut(u32) -> Result<T, RunError>,
) -> Result<T, RunError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "retries exhausted");
            return Err(RunError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        attempt += 1;
        let delay = policy.delay_before(attempt, rand::thread_rng().r#gen::<f64>());
        let notice = RetryNotice {
            attempt,
            max_attempts,
            delay,
            base_delay: policy.base_delay_before(attempt),
            error: &err,
        };
        info!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, backing off");
        on_retry(&notice);
        sleeper.sleep(delay);
    }
}
