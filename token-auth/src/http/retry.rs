//! Exponential backoff for transient API failures.

use std::time::{Duration, SystemTime};

use reqwest_retry::{RetryDecision, RetryPolicy};

/// Retries transient failures (connection errors, 408, 429, 5xx as classified by
/// `reqwest-retry`) with a doubling delay, capped at `max_delay`.
pub struct RetryAfterPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryAfterPolicy {
    /// Start at 250 ms and never wait longer than 5 s between attempts.
    pub fn new(max_retries: u32) -> Self {
        Self::with_delays(max_retries, Duration::from_millis(250), Duration::from_secs(5))
    }

    pub fn with_delays(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    fn delay_for(&self, n_past_retries: u32) -> Duration {
        let factor = 2u32.saturating_pow(n_past_retries);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl RetryPolicy for RetryAfterPolicy {
    fn should_retry(&self, _request_start_time: SystemTime, n_past_retries: u32) -> RetryDecision {
        if n_past_retries >= self.max_retries {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry {
            execute_after: SystemTime::now() + self.delay_for(n_past_retries),
        }
    }
}
