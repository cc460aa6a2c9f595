//! Splits a batch request into per-instrument chunks.
//!
//! Chunks for one instrument are contiguous, non-overlapping, aligned to the
//! resolution stride, and together cover exactly the effective range. The
//! planner is pure: no I/O, no clock.

use std::collections::HashSet;

use candle_batch_core::{Instrument, Resolution, TimeRange};
use chrono::Duration;
use tracing::{debug, warn};

use crate::config::{AlignmentPolicy, BatchConfig};
use crate::error::BatchError;
use crate::request::BatchRequest;

/// A contiguous slice of one instrument's range, fetched as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub instrument: Instrument,
    pub resolution: Resolution,
    pub range: TimeRange,
    /// Position within the instrument's chunk sequence.
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkPlan {
    /// Effective range after alignment.
    pub range: TimeRange,
    pub resolution: Resolution,
    /// Distinct instruments, in request order.
    pub instruments: Vec<Instrument>,
    pub chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn chunks_for<'a>(
        &'a self,
        instrument: &'a Instrument,
    ) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.chunks.iter().filter(move |c| &c.instrument == instrument)
    }

    pub fn chunks_per_instrument(&self) -> usize {
        self.chunks.len().checked_div(self.instruments.len()).unwrap_or(0)
    }
}

/// Validate a request and lay out its chunks.
pub fn plan(request: &BatchRequest, config: &BatchConfig) -> Result<ChunkPlan, BatchError> {
    let instruments = distinct_instruments(&request.instruments)?;
    if instruments.len() > config.max_instruments {
        return Err(BatchError::Validation(format!(
            "batch names {} instruments, limit is {}",
            instruments.len(),
            config.max_instruments
        )));
    }

    let requested = TimeRange::new(request.start, request.end)?;
    let range = if requested.is_aligned(request.resolution) {
        requested
    } else {
        match config.alignment {
            AlignmentPolicy::Reject => {
                return Err(BatchError::Validation(format!(
                    "range {requested} is not aligned to {}",
                    request.resolution
                )));
            }
            AlignmentPolicy::Expand => {
                let expanded = requested.expand_to(request.resolution);
                warn!(%requested, %expanded, "expanded range to stride boundaries");
                expanded
            }
        }
    };

    let span = Duration::from_std(config.max_page_span)
        .map_err(|e| BatchError::Validation(format!("max_page_span out of range: {e}")))?;
    let slices = split_range(range, request.resolution, span)?;

    let chunks = instruments
        .iter()
        .flat_map(|instrument| {
            slices.iter().enumerate().map(move |(index, slice)| Chunk {
                instrument: instrument.clone(),
                resolution: request.resolution,
                range: *slice,
                index,
            })
        })
        .collect::<Vec<_>>();

    debug!(
        correlation_id = %request.correlation_id,
        instruments = instruments.len(),
        chunks = chunks.len(),
        %range,
        "planned batch"
    );

    Ok(ChunkPlan {
        range,
        resolution: request.resolution,
        instruments,
        chunks,
    })
}

/// Trim ids, reject empties, and collapse duplicates keeping first position.
fn distinct_instruments(requested: &[Instrument]) -> Result<Vec<Instrument>, BatchError> {
    if requested.is_empty() {
        return Err(BatchError::Validation("batch names no instruments".into()));
    }

    let mut seen = HashSet::new();
    let mut instruments = Vec::with_capacity(requested.len());
    for instrument in requested {
        if instrument.is_empty() {
            return Err(BatchError::Validation("instrument id must not be empty".into()));
        }
        let instrument = Instrument::new(instrument.as_str().trim());
        if seen.insert(instrument.clone()) {
            instruments.push(instrument);
        }
    }
    Ok(instruments)
}

/// Split an aligned range into slices of at most `span`, rounded down to a
/// whole number of strides (never less than one stride).
pub fn split_range(
    range: TimeRange,
    resolution: Resolution,
    span: Duration,
) -> Result<Vec<TimeRange>, BatchError> {
    let strides = (span.num_seconds() / resolution.seconds()).max(1);
    let step = Duration::seconds(strides * resolution.seconds());

    let mut slices = Vec::new();
    let mut cursor = range.start();
    while cursor < range.end() {
        let next = (cursor + step).min(range.end());
        slices.push(TimeRange::new(cursor, next)?);
        cursor = next;
    }
    Ok(slices)
}
