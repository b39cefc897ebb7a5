//! Retry backoff for failed jobs

use rand::Rng;
use sel_common::config::JobsConfig;
use std::time::Duration;

/// Delay before retry `n` is `initial × coefficient^(n-1)`, capped at `maximum`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff_coefficient: u32,
    initial_interval: Duration,
    maximum_interval: Duration,
}

impl RetryPolicy {
    pub fn new(backoff_coefficient: u32, initial_interval: Duration, maximum_interval: Duration) -> Self {
        Self {
            backoff_coefficient: backoff_coefficient.max(1),
            initial_interval,
            maximum_interval,
        }
    }

    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(
            config.retry_backoff,
            Duration::from_millis(config.retry_initial_ms),
            Duration::from_millis(config.retry_max_ms),
        )
    }

    /// Backoff after the `attempt`-th failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.backoff_coefficient.saturating_pow(exponent);
        self.initial_interval
            .checked_mul(factor)
            .unwrap_or(self.maximum_interval)
            .min(self.maximum_interval)
    }

    /// `backoff` plus up to 10% jitter so retries of a burst spread out
    pub fn time_until_next_retry(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter_ms = (base.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        (base + Duration::from_millis(jitter)).min(self.maximum_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default())
    }
}
