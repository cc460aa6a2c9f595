use std::sync::Arc;
use std::time::Duration;

use candle_batch_core::CandleError;
use candle_batch_providers::FetchError;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::coordinator::BatchState;
use crate::series::SeriesGap;
use crate::sink::SinkError;

/// Sources are shared so one failure can be reported against every
/// instrument it affected.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out after {waited:?} waiting for a rate-limit token")]
    RateLimitTimeout { waited: Duration },

    #[error("Fetch failed after {attempts} attempt(s): {source}")]
    RetryableFetch {
        attempts: u32,
        #[source]
        source: Arc<FetchError>,
    },

    #[error("Fetch failed permanently: {0}")]
    NonRetryableFetch(#[source] Arc<FetchError>),

    #[error("Series gap: {0}")]
    SeriesGap(SeriesGap),

    #[error("Candle at {timestamp} is off the resolution stride")]
    Misaligned { timestamp: DateTime<Utc> },

    #[error("Publish failed after {attempts} attempt(s): {source}")]
    PublishFailure {
        attempts: u32,
        #[source]
        source: Arc<SinkError>,
    },

    #[error("Withheld: all-or-nothing batch had failed instruments")]
    Withheld,

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Worker pool exhausted with {unresolved} unresolved chunk(s)")]
    PoolExhausted { unresolved: usize },

    #[error("Invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: BatchState, to: BatchState },
}

impl From<CandleError> for BatchError {
    fn from(err: CandleError) -> Self {
        match err {
            CandleError::Validation(msg) => BatchError::Validation(msg),
            other => BatchError::Validation(other.to_string()),
        }
    }
}

impl From<FetchError> for BatchError {
    fn from(err: FetchError) -> Self {
        BatchError::NonRetryableFetch(Arc::new(err))
    }
}
