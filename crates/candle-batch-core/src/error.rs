use thiserror::Error;

use crate::instrument::Instrument;

#[derive(Debug, Error)]
pub enum CandleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("No stored series for {instrument} covering {range}")]
    NoData { instrument: Instrument, range: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
