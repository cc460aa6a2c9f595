use std::fmt;

use candle_batch_core::schema::SeriesMetadata;
use candle_batch_core::{Candle, Instrument, Resolution, TimeRange};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::BatchError;

/// A run of missing candle slots, `[from, to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesGap {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SeriesGap {
    /// Number of candle slots the gap covers.
    pub fn missing(&self, resolution: Resolution) -> i64 {
        (self.to - self.from).num_seconds() / resolution.seconds()
    }
}

impl fmt::Display for SeriesGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no candles in [{}, {})",
            self.from.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.to.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeriesStatus {
    Complete,
    CompleteWithGaps,
    Failed,
}

/// The assembled candles for one instrument over the batch range.
#[derive(Debug)]
pub struct Series {
    pub instrument: Instrument,
    pub resolution: Resolution,
    pub range: TimeRange,
    /// Strictly increasing, one stride apart except across gaps.
    pub candles: Vec<Candle>,
    pub gaps: Vec<SeriesGap>,
    pub failure: Option<BatchError>,
}

impl Series {
    pub fn status(&self) -> SeriesStatus {
        if self.failure.is_some() {
            SeriesStatus::Failed
        } else if self.gaps.is_empty() {
            SeriesStatus::Complete
        } else {
            SeriesStatus::CompleteWithGaps
        }
    }

    pub fn metadata(&self) -> SeriesMetadata {
        SeriesMetadata {
            instrument: self.instrument.clone(),
            resolution: self.resolution,
            range: self.range,
        }
    }
}
