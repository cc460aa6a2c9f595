use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// How the planner treats range bounds that do not fall on a stride boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPolicy {
    /// Fail planning with a validation error.
    #[default]
    Reject,
    /// Floor the start and ceil the end to the nearest boundary.
    Expand,
}

/// Tuning knobs for one coordinator. Every field has a default, so a config
/// file only needs to name what it changes. Durations use humantime strings
/// such as `"500ms"` or `"3days 11h 20m"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Longest sub-range requested per chunk.
    #[serde(with = "humantime_serde")]
    pub max_page_span: Duration,
    pub worker_pool_size: usize,
    /// Upstream calls allowed per `rate_window`, shared by all workers.
    pub requests_per_window: u32,
    #[serde(with = "humantime_serde")]
    pub rate_window: Duration,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,
    /// Total attempts per upstream call or publish, first try included.
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    pub jitter: bool,
    /// Escalate any gap to a failed series.
    pub strict_completeness: bool,
    /// Treat failed chunks as gaps instead of failing the instrument.
    pub tolerate_chunk_failures: bool,
    pub alignment: AlignmentPolicy,
    pub max_instruments: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_page_span: Duration::from_secs(5_000 * 60),
            worker_pool_size: 4,
            requests_per_window: 100,
            rate_window: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: true,
            strict_completeness: false,
            tolerate_chunk_failures: false,
            alignment: AlignmentPolicy::Reject,
            max_instruments: 500,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), BatchError> {
        let checks = [
            (self.worker_pool_size == 0, "worker_pool_size must be at least 1"),
            (self.requests_per_window == 0, "requests_per_window must be at least 1"),
            (self.rate_window.is_zero(), "rate_window must be positive"),
            (self.retry_attempts == 0, "retry_attempts must be at least 1"),
            (self.max_page_span.is_zero(), "max_page_span must be positive"),
            (self.max_instruments == 0, "max_instruments must be at least 1"),
        ];
        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(BatchError::Validation(reason.to_string())),
            None => Ok(()),
        }
    }
}
