use async_trait::async_trait;
use candle_batch_core::{Candle, Instrument, Page, Resolution};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;
use crate::http::check_status;
use crate::provider::CandleClient;

const ALPACA_DATA_BASE_URL: &str = "https://data.alpaca.markets/v2";
const ALPACA_PAGE_LIMIT: &str = "10000";

/// Alpaca market data client.
/// Authenticates via APCA-API-KEY-ID and APCA-API-SECRET-KEY headers.
pub struct AlpacaClient {
    client: Client,
    api_key_id: String,
    api_secret_key: String,
    base_url: String,
}

impl AlpacaClient {
    /// Create from environment variables `ALPACA_API_KEY_ID` and `ALPACA_API_SECRET_KEY`.
    pub fn from_env() -> Result<Self, FetchError> {
        let api_key_id = std::env::var("ALPACA_API_KEY_ID")
            .map_err(|_| FetchError::Config("ALPACA_API_KEY_ID not set".into()))?;
        let api_secret_key = std::env::var("ALPACA_API_SECRET_KEY")
            .map_err(|_| FetchError::Config("ALPACA_API_SECRET_KEY not set".into()))?;

        Ok(Self::new(api_key_id, api_secret_key, None))
    }

    /// Create with explicit credentials and optional base URL override.
    pub fn new(api_key_id: String, api_secret_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key_id,
            api_secret_key,
            base_url: base_url.unwrap_or_else(|| ALPACA_DATA_BASE_URL.to_string()),
        }
    }
}

/// Alpaca timeframe for a resolution. Sub-minute bars are not offered.
fn timeframe(resolution: Resolution) -> Result<&'static str, FetchError> {
    Ok(match resolution {
        Resolution::M1 => "1Min",
        Resolution::M2 => "2Min",
        Resolution::M4 => "4Min",
        Resolution::M5 => "5Min",
        Resolution::M10 => "10Min",
        Resolution::M15 => "15Min",
        Resolution::M30 => "30Min",
        Resolution::H1 => "1Hour",
        Resolution::H2 => "2Hour",
        Resolution::H3 => "3Hour",
        Resolution::H4 => "4Hour",
        Resolution::H6 => "6Hour",
        Resolution::H8 => "8Hour",
        Resolution::H12 => "12Hour",
        Resolution::D => "1Day",
        Resolution::W => "1Week",
        Resolution::S5 | Resolution::S10 | Resolution::S15 | Resolution::S30 => {
            return Err(FetchError::Config(format!(
                "alpaca has no {resolution} timeframe"
            )));
        }
    })
}

#[derive(Debug, Deserialize)]
struct AlpacaBarsResponse {
    bars: Option<Vec<AlpacaBar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    /// Timestamp in RFC3339 format
    t: String,
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
    v: i64,
}

impl AlpacaBar {
    fn to_candle(&self) -> Result<Candle, FetchError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.t)
            .map_err(|e| FetchError::Parse(format!("invalid timestamp '{}': {e}", self.t)))?
            .with_timezone(&Utc);

        Ok(Candle {
            timestamp,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
            volume: self.v,
        })
    }
}

fn into_page(instrument: &Instrument, body: AlpacaBarsResponse) -> Result<Page, FetchError> {
    let mut candles = body
        .bars
        .unwrap_or_default()
        .iter()
        .map(AlpacaBar::to_candle)
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.timestamp);

    Ok(Page {
        instrument: instrument.clone(),
        candles,
        cursor: body.next_page_token.filter(|token| !token.is_empty()),
    })
}

#[async_trait]
impl CandleClient for AlpacaClient {
    fn name(&self) -> &str {
        "alpaca"
    }

    async fn fetch_page(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError> {
        let timeframe = timeframe(resolution)?;
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut request = self
            .client
            .get(format!("{}/stocks/{}/bars", self.base_url, instrument))
            .header("APCA-API-KEY-ID", &self.api_key_id)
            .header("APCA-API-SECRET-KEY", &self.api_secret_key)
            .query(&[
                ("timeframe", timeframe),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("adjustment", "split"),
                ("feed", "iex"),
                ("limit", ALPACA_PAGE_LIMIT),
            ]);

        if let Some(token) = cursor {
            request = request.query(&[("page_token", token)]);
        }

        let body: AlpacaBarsResponse = check_status(request.send().await?)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("failed to parse response: {e}")))?;

        let page = into_page(instrument, body)?;
        debug!(
            "{instrument}: alpaca returned {} bar(s), more: {}",
            page.candles.len(),
            page.has_more()
        );
        Ok(page)
    }
}
