//! Per-instrument reassembly of chunk results.
//!
//! Chunks may finish in any order. Results are buffered by chunk start so
//! the assembled series never depends on arrival order.

use std::collections::{BTreeMap, HashMap};

use candle_batch_core::{Candle, Instrument, Resolution, TimeRange};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::BatchError;
use crate::planner::{Chunk, ChunkPlan};
use crate::series::{Series, SeriesGap};

type ChunkResult = Result<Vec<Candle>, BatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyOptions {
    /// Gaps fail the series.
    pub strict: bool,
    /// Failed chunks become gaps instead of failing the series.
    pub tolerate_chunk_failures: bool,
}

#[derive(Debug)]
pub struct Assembler {
    resolution: Resolution,
    range: TimeRange,
    options: AssemblyOptions,
    order: Vec<Instrument>,
    buffers: HashMap<Instrument, Slots>,
    /// Empty slots across all instruments.
    remaining: usize,
}

#[derive(Debug, Default)]
struct Slots {
    results: BTreeMap<DateTime<Utc>, Option<ChunkResult>>,
    remaining: usize,
}

impl Assembler {
    pub fn new(plan: &ChunkPlan, options: AssemblyOptions) -> Self {
        let mut buffers: HashMap<_, Slots> = HashMap::new();
        let mut remaining = 0;
        for chunk in &plan.chunks {
            let slots = buffers.entry(chunk.instrument.clone()).or_default();
            if slots.results.insert(chunk.range.start(), None).is_none() {
                slots.remaining += 1;
                remaining += 1;
            }
        }
        Self {
            resolution: plan.resolution,
            range: plan.range,
            options,
            order: plan.instruments.clone(),
            buffers,
            remaining,
        }
    }

    /// Record a chunk result. Returns true when the instrument has every
    /// chunk it was planned with.
    pub fn accept(&mut self, chunk: &Chunk, result: ChunkResult) -> bool {
        let Some(slots) = self.buffers.get_mut(&chunk.instrument) else {
            warn!(instrument = %chunk.instrument, "result for unplanned instrument ignored");
            return false;
        };
        match slots.results.get_mut(&chunk.range.start()) {
            Some(slot) if slot.is_none() => {
                *slot = Some(result);
                slots.remaining -= 1;
                self.remaining -= 1;
            }
            Some(_) => {
                warn!(instrument = %chunk.instrument, range = %chunk.range, "duplicate chunk result ignored");
            }
            None => {
                warn!(instrument = %chunk.instrument, range = %chunk.range, "result for unplanned chunk ignored");
            }
        }
        slots.remaining == 0
    }

    /// Chunks still without a result, across all instruments.
    pub fn unresolved(&self) -> usize {
        self.remaining
    }

    /// Fill every unresolved chunk with an error produced by `reason`.
    pub fn resolve_missing(&mut self, reason: impl Fn() -> BatchError) {
        if self.remaining == 0 {
            return;
        }
        for slots in self.buffers.values_mut() {
            for slot in slots.results.values_mut() {
                if slot.is_none() {
                    *slot = Some(Err(reason()));
                }
            }
            slots.remaining = 0;
        }
        self.remaining = 0;
    }

    /// Assemble every instrument, in plan order. Unresolved chunks count as
    /// failed with [`BatchError::Cancelled`].
    pub fn finish(mut self) -> Vec<Series> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .map(|instrument| {
                let slots = self.buffers.remove(&instrument).unwrap_or_default();
                let results = slots
                    .results
                    .into_values()
                    .map(|slot| slot.unwrap_or(Err(BatchError::Cancelled)));
                assemble(instrument, self.resolution, self.range, results, self.options)
            })
            .collect()
    }
}

/// Merge chunk results, given in chunk order, into one series.
pub fn assemble(
    instrument: Instrument,
    resolution: Resolution,
    range: TimeRange,
    results: impl IntoIterator<Item = ChunkResult>,
    options: AssemblyOptions,
) -> Series {
    let mut candles = Vec::new();
    let mut failure = None;
    let mut tolerated = None;
    for result in results {
        match result {
            Ok(chunk) => candles.extend(chunk),
            Err(e) if options.tolerate_chunk_failures => {
                warn!(%instrument, "tolerating failed chunk: {e}");
                tolerated.get_or_insert(e);
            }
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                } else {
                    debug!(%instrument, "further chunk failure: {e}");
                }
            }
        }
    }

    let failed = |failure: BatchError, gaps: Vec<SeriesGap>| Series {
        instrument: instrument.clone(),
        resolution,
        range,
        candles: Vec::new(),
        gaps,
        failure: Some(failure),
    };

    if let Some(failure) = failure {
        return failed(failure, Vec::new());
    }

    candles.retain(|c| range.contains(c.timestamp));
    // Tolerated failures only fill gaps around data that did arrive.
    if let Some(first) = tolerated {
        if candles.is_empty() {
            return failed(first, find_gaps(&[], resolution, range));
        }
    }

    // Stable sort keeps the earlier chunk's copy first among equal timestamps.
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);

    if let Some(stray) = candles.iter().find(|c| !resolution.is_aligned(c.timestamp)) {
        return failed(
            BatchError::Misaligned {
                timestamp: stray.timestamp,
            },
            Vec::new(),
        );
    }

    let gaps = find_gaps(&candles, resolution, range);
    if options.strict {
        if let Some(first) = gaps.first().cloned() {
            return failed(BatchError::SeriesGap(first), gaps);
        }
    }

    if !gaps.is_empty() {
        debug!(%instrument, gaps = gaps.len(), "series has gaps");
    }

    Series {
        instrument,
        resolution,
        range,
        candles,
        gaps,
        failure: None,
    }
}

/// Maximal runs of missing slots in sorted, aligned, deduplicated candles.
fn find_gaps(candles: &[Candle], resolution: Resolution, range: TimeRange) -> Vec<SeriesGap> {
    let stride = resolution.stride();
    let mut gaps = Vec::new();
    let mut expected = range.start();
    for candle in candles {
        if candle.timestamp > expected {
            gaps.push(SeriesGap {
                from: expected,
                to: candle.timestamp,
            });
        }
        expected = candle.timestamp + stride;
    }
    if expected < range.end() {
        gaps.push(SeriesGap {
            from: expected,
            to: range.end(),
        });
    }
    gaps
}
