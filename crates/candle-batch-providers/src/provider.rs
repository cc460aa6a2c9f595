use async_trait::async_trait;
use candle_batch_core::{Instrument, Page, Resolution};
use chrono::{DateTime, Utc};

use crate::error::FetchError;

/// Upstream source of historical candles, fetched one page at a time.
#[async_trait]
pub trait CandleClient: Send + Sync {
    /// Client name (for logging/display).
    fn name(&self) -> &str;

    /// Fetch one page of candles for `[start, end)`.
    ///
    /// `cursor` is the continuation returned by the previous page for the
    /// same range, or `None` for the first call. Returned candles are sorted
    /// by timestamp; a page with a cursor means more data remains.
    async fn fetch_page(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError>;
}
