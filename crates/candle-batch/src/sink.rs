use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use candle_batch_core::CandleError;
use candle_batch_core::store::CandleStore;
use thiserror::Error;
use tracing::debug;

use crate::request::IdempotencyKey;
use crate::series::Series;

/// What the sink did with a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Ack {
    /// The series was stored by this call.
    Delivered,
    /// The key was already stored; nothing changed.
    Duplicate,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected series: {0}")]
    Rejected(String),

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store error: {0}")]
    Store(#[from] CandleError),

    #[error("Sink task failed: {0}")]
    Task(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Unavailable(_) | SinkError::Timeout(_) => true,
            SinkError::Store(err) => matches!(err, CandleError::Io(_)),
            SinkError::Rejected(_) | SinkError::Task(_) => false,
        }
    }
}

/// Downstream destination for assembled series. Implementations must treat
/// a repeated key as a no-op and answer [`Ack::Duplicate`].
#[async_trait]
pub trait CandleSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, series: &Series, key: &IdempotencyKey) -> Result<Ack, SinkError>;
}

/// Writes each series to the Parquet store and records its key in the
/// store's ledger.
pub struct ParquetSink {
    store: Arc<CandleStore>,
}

impl ParquetSink {
    pub fn new(store: CandleStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }
}

#[async_trait]
impl CandleSink for ParquetSink {
    fn name(&self) -> &str {
        "parquet"
    }

    async fn publish(&self, series: &Series, key: &IdempotencyKey) -> Result<Ack, SinkError> {
        let store = Arc::clone(&self.store);
        let metadata = series.metadata();
        let candles = series.candles.clone();
        let key = key.clone();

        tokio::task::spawn_blocking(move || -> Result<Ack, SinkError> {
            if store.is_acknowledged(key.as_str()) {
                debug!(%key, "already published");
                return Ok(Ack::Duplicate);
            }
            let path = store.write_series(&metadata, &candles)?;
            if store.record_ack(key.as_str(), &path)? {
                Ok(Ack::Delivered)
            } else {
                Ok(Ack::Duplicate)
            }
        })
        .await
        .map_err(|e| SinkError::Task(e.to_string()))?
    }
}
