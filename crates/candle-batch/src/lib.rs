//! Batch retrieval of historical candles.
//!
//! A [`Coordinator`] takes a [`BatchRequest`] for many instruments over one
//! range, splits it into chunks, fetches them through a bounded worker pool
//! under a shared rate budget, reassembles each instrument's series in
//! order, and publishes every series to a [`CandleSink`] at most once per
//! idempotency key.

pub mod assembler;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod planner;
pub mod pool;
pub mod publisher;
pub mod request;
pub mod retry;
pub mod series;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AlignmentPolicy, BatchConfig};
pub use coordinator::{BatchReport, BatchState, Coordinator, InstrumentOutcome, InstrumentStatus};
pub use error::BatchError;
pub use request::{BatchRequest, IdempotencyKey};
pub use series::{Series, SeriesGap, SeriesStatus};
pub use sink::{Ack, CandleSink, ParquetSink, SinkError};
