//! Backoff for transient channel errors.
//!
//! Only [`Error::Unreachable`] is retried. A target that answered with
//! anything else answered, and asking again will not change the reply.

use crate::error::{Error, Result};
use std::thread;
use std::time::Duration;

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Wait before the second attempt
    pub initial_delay: Duration,
    /// Growth of the wait per attempt
    pub multiplier: f64,
    /// Upper bound for a single wait
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Retry `attempts` times in total, starting at `initial_delay`.
    pub fn new(attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            attempts,
            initial_delay,
            multiplier,
            ..Self::default()
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Waits between consecutive attempts, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts.saturating_sub(1)).map(|step| {
            let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(step as i32);
            Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
        })
    }
}

/// Notified before each retry.
pub trait RetryCallback {
    /// `attempt` is the 1-based attempt that just failed.
    fn on_retry(&self, attempt: u32, attempts: u32, error: &Error, delay: Duration);
}

/// Logs retries at warn level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, attempts: u32, error: &Error, delay: Duration) {
        log::warn!(
            "Target call {}/{} failed: {}. Retrying in {:.1}s",
            attempt,
            attempts,
            error,
            delay.as_secs_f64()
        );
    }
}

/// Run `operation`, retrying while the target is unreachable.
///
/// The last error is returned once the attempts run out. Any other error
/// is returned straight away.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut delays = config.delays();
    let mut attempt = 1;
    loop {
        let error = match operation() {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let Some(delay) = delays.next().filter(|_| error.is_retryable()) else {
            return Err(error);
        };
        if let Some(cb) = callback {
            cb.on_retry(attempt, config.attempts, &error, delay);
        }
        thread::sleep(delay);
        attempt += 1;
    }
}
