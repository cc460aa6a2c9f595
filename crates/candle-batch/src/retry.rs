use std::time::Duration;

use rand::Rng;

use crate::config::BatchConfig;

/// Exponential backoff with a cap and optional +/-25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            attempts: attempts.max(1),
            base,
            max,
            jitter,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.retry_attempts,
            config.backoff_base,
            config.max_backoff,
            config.jitter,
        )
    }

    /// Total attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent).min(self.max);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.75..=1.25);
        delay.mul_f64(factor).min(self.max)
    }
}
