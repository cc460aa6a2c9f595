use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CandleError;
use crate::resolution::Resolution;

/// Closed-open interval `[start, end)` of UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting empty and inverted intervals.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CandleError> {
        if start >= end {
            return Err(CandleError::Validation(format!(
                "time range must satisfy start < end (got [{start}, {end}))"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn is_aligned(&self, resolution: Resolution) -> bool {
        resolution.is_aligned(self.start) && resolution.is_aligned(self.end)
    }

    /// Smallest range on stride boundaries that covers `self`.
    pub fn expand_to(&self, resolution: Resolution) -> Self {
        Self {
            start: resolution.floor(self.start),
            end: resolution.ceil(self.end),
        }
    }

    /// Number of candle slots in the range. Assumes an aligned range.
    pub fn slot_count(&self, resolution: Resolution) -> i64 {
        self.duration().num_seconds() / resolution.seconds()
    }

    /// Every expected candle timestamp in the range, in order.
    pub fn slots(&self, resolution: Resolution) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let stride = resolution.stride();
        let mut next = self.start;
        std::iter::from_fn(move || {
            if next >= self.end {
                return None;
            }
            let current = next;
            next += stride;
            Some(current)
        })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
