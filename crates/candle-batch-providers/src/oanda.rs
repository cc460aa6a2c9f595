use async_trait::async_trait;
use candle_batch_core::{Candle, Instrument, Page, Resolution};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;
use crate::http::check_status;
use crate::provider::CandleClient;

const OANDA_PRACTICE_URL: &str = "https://api-fxpractice.oanda.com";

/// Maximum candles OANDA returns for one request.
pub const OANDA_MAX_CANDLES: i64 = 5_000;

/// The server rejects `to` values in the future; stay a little behind now.
const SERVER_CLOCK_MARGIN_SECS: i64 = 10;

/// OANDA v20 REST candles client.
/// Authenticates with a bearer token and requests midpoint prices.
///
/// OANDA has no native pagination for `from`/`to` queries, so the client
/// splits the range into windows of at most [`OANDA_MAX_CANDLES`] candles and
/// returns the start of the next window as the cursor.
pub struct OandaClient {
    client: Client,
    api_token: String,
    base_url: String,
    max_candles: i64,
}

impl OandaClient {
    /// Create from environment variables `OANDA_API_TOKEN` and optional `OANDA_API_URL`.
    pub fn from_env() -> Result<Self, FetchError> {
        let api_token = std::env::var("OANDA_API_TOKEN")
            .map_err(|_| FetchError::Config("OANDA_API_TOKEN not set".into()))?;
        let base_url = std::env::var("OANDA_API_URL").ok();
        Ok(Self::new(api_token, base_url))
    }

    pub fn new(api_token: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_token,
            base_url: base_url.unwrap_or_else(|| OANDA_PRACTICE_URL.to_string()),
            max_candles: OANDA_MAX_CANDLES,
        }
    }

    /// Override the per-request candle cap.
    pub fn with_max_candles(mut self, max_candles: i64) -> Self {
        self.max_candles = max_candles.max(1);
        self
    }
}

/// One request window: `[from, to)` plus the cursor for the next window.
#[derive(Debug, PartialEq, Eq)]
struct Window {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    next: Option<String>,
}

fn format_instant(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn plan_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cursor: Option<&str>,
    resolution: Resolution,
    max_candles: i64,
    now: DateTime<Utc>,
) -> Result<Window, FetchError> {
    let from = match cursor {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| FetchError::Malformed(format!("invalid cursor '{raw}': {e}")))?
            .with_timezone(&Utc),
        None => start,
    };

    let latest = now - Duration::seconds(SERVER_CLOCK_MARGIN_SECS);
    let capped = from + Duration::seconds(resolution.seconds() * max_candles);
    let to = end.min(capped).min(latest.max(from));

    let next = (to == capped && capped < end).then(|| format_instant(capped));
    Ok(Window { from, to, next })
}

#[derive(Debug, Deserialize)]
struct OandaCandlesResponse {
    #[serde(default)]
    candles: Vec<OandaCandle>,
}

#[derive(Debug, Deserialize)]
struct OandaCandle {
    /// RFC3339 with nanosecond precision
    time: String,
    volume: i64,
    complete: bool,
    mid: Option<OandaPrice>,
}

#[derive(Debug, Deserialize)]
struct OandaPrice {
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
}

impl OandaCandle {
    fn to_candle(&self) -> Result<Candle, FetchError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.time)
            .map_err(|e| FetchError::Parse(format!("invalid timestamp '{}': {e}", self.time)))?
            .with_timezone(&Utc);
        let mid = self
            .mid
            .as_ref()
            .ok_or_else(|| FetchError::Parse(format!("candle at {} has no mid prices", self.time)))?;

        Ok(Candle {
            timestamp,
            open: mid.o,
            high: mid.h,
            low: mid.l,
            close: mid.c,
            volume: self.volume,
        })
    }
}

/// Keep finished candles only; the in-progress candle would change later.
fn complete_candles(response: &OandaCandlesResponse) -> Result<Vec<Candle>, FetchError> {
    let mut candles = response
        .candles
        .iter()
        .filter(|c| c.complete)
        .map(OandaCandle::to_candle)
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

#[async_trait]
impl CandleClient for OandaClient {
    fn name(&self) -> &str {
        "oanda"
    }

    async fn fetch_page(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError> {
        let window = plan_window(start, end, cursor, resolution, self.max_candles, Utc::now())?;
        if window.from >= window.to {
            return Ok(Page::last(instrument.clone(), Vec::new()));
        }

        let from = format_instant(window.from);
        let to = format_instant(window.to);
        let response = self
            .client
            .get(format!(
                "{}/v3/instruments/{}/candles",
                self.base_url, instrument
            ))
            .bearer_auth(&self.api_token)
            .query(&[
                ("price", "M"),
                ("granularity", resolution.code()),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ])
            .send()
            .await?;

        let body: OandaCandlesResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("failed to parse response: {e}")))?;

        let candles = complete_candles(&body)?;
        debug!(
            "{instrument}: oanda returned {} candle(s) for [{}, {})",
            candles.len(),
            window.from,
            window.to
        );

        Ok(Page {
            instrument: instrument.clone(),
            candles,
            cursor: window.next,
        })
    }
}
