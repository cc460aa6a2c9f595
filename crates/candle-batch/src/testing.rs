//! Scripted provider and in-memory sink for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use candle_batch_core::{Candle, Instrument, Page, Resolution, TimeRange};
use candle_batch_providers::{CandleClient, FetchError};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Instant;

use crate::request::IdempotencyKey;
use crate::series::Series;
use crate::sink::{Ack, CandleSink, SinkError};

pub(crate) fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()
}

pub(crate) fn candle(timestamp: DateTime<Utc>) -> Candle {
    let price = dec!(1.1000) + Decimal::new(timestamp.timestamp() % 600, 4);
    Candle {
        timestamp,
        open: price,
        high: price + dec!(0.0005),
        low: price - dec!(0.0005),
        close: price,
        volume: 10,
    }
}

pub(crate) fn candles_between(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    resolution: Resolution,
) -> Vec<Candle> {
    TimeRange::new(from, to)
        .map(|range| range.slots(resolution).map(candle).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    /// 503 from upstream.
    Retryable,
    /// 401 from upstream.
    Permanent,
    Panic,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub instrument: Instrument,
    pub start: DateTime<Utc>,
    pub cursor: Option<String>,
    pub at: Instant,
}

/// Serves a full candle for every slot unless told otherwise.
#[derive(Debug, Default)]
pub(crate) struct ScriptedClient {
    page_size: Option<usize>,
    latency: Duration,
    stuck_cursor: bool,
    missing: HashSet<(Instrument, DateTime<Utc>)>,
    extra: HashMap<Instrument, Vec<Candle>>,
    /// Keyed by chunk start; `None` remaining means fail forever.
    failures: Mutex<HashMap<(Instrument, DateTime<Utc>), (Failure, Option<u32>)>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every page is empty and hands back the cursor it was called with.
    pub fn with_stuck_cursor(mut self) -> Self {
        self.stuck_cursor = true;
        self
    }

    pub fn without(mut self, instrument: &str, timestamp: DateTime<Utc>) -> Self {
        self.missing.insert((Instrument::new(instrument), timestamp));
        self
    }

    /// Append a candle to every response for `instrument`.
    pub fn with_extra(mut self, instrument: &str, candle: Candle) -> Self {
        self.extra.entry(Instrument::new(instrument)).or_default().push(candle);
        self
    }

    pub fn failing(
        self,
        instrument: &str,
        chunk_start: DateTime<Utc>,
        failure: Failure,
        times: Option<u32>,
    ) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((Instrument::new(instrument), chunk_start), (failure, times));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, instrument: &str, chunk_start: DateTime<Utc>) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.instrument.as_str() == instrument && c.start == chunk_start)
            .count()
    }

    fn scripted_failure(&self, instrument: &Instrument, start: DateTime<Utc>) -> Option<Failure> {
        let mut failures = self.failures.lock().unwrap();
        let (failure, remaining) = failures.get_mut(&(instrument.clone(), start))?;
        match remaining {
            None => Some(*failure),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(*failure)
            }
        }
    }
}

#[async_trait]
impl CandleClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_page(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError> {
        self.calls.lock().unwrap().push(Call {
            instrument: instrument.clone(),
            start,
            cursor: cursor.map(str::to_string),
            at: Instant::now(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.scripted_failure(instrument, start) {
            Some(Failure::Retryable) => {
                return Err(FetchError::Api {
                    status: 503,
                    message: "service unavailable".into(),
                });
            }
            Some(Failure::Permanent) => {
                return Err(FetchError::Auth {
                    status: 401,
                    message: "bad token".into(),
                });
            }
            Some(Failure::Panic) => panic!("scripted panic"),
            None => {}
        }

        let mut candles: Vec<Candle> = candles_between(start, end, resolution)
            .into_iter()
            .filter(|c| !self.missing.contains(&(instrument.clone(), c.timestamp)))
            .collect();
        candles.extend(self.extra.get(instrument).cloned().unwrap_or_default());

        if self.stuck_cursor {
            return Ok(Page {
                instrument: instrument.clone(),
                candles: Vec::new(),
                cursor: Some(cursor.unwrap_or("0").to_string()),
            });
        }

        let Some(size) = self.page_size else {
            return Ok(Page::last(instrument.clone(), candles));
        };
        let offset: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let page: Vec<Candle> = candles.iter().skip(offset).take(size).cloned().collect();
        let next = offset + size;
        Ok(Page {
            instrument: instrument.clone(),
            candles: page,
            cursor: (next < candles.len()).then(|| next.to_string()),
        })
    }
}

/// Keeps delivered series in memory, keyed by idempotency key.
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    delivered: Mutex<HashMap<IdempotencyKey, Vec<Candle>>>,
    transient_failures: AtomicU32,
    permanent: bool,
    latency: Duration,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(self, times: u32) -> Self {
        self.transient_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn delivered(&self) -> HashMap<IdempotencyKey, Vec<Candle>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_for(&self, instrument: &str) -> Option<Vec<Candle>> {
        self.delivered()
            .into_iter()
            .find(|(key, _)| key.as_str().contains(&format!(":{instrument}:")))
            .map(|(_, candles)| candles)
    }
}

#[async_trait]
impl CandleSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, series: &Series, key: &IdempotencyKey) -> Result<Ack, SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.permanent {
            return Err(SinkError::Rejected("sink is read-only".into()));
        }
        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(SinkError::Unavailable("try again".into()));
        }

        let mut delivered = self.delivered.lock().unwrap();
        if delivered.contains_key(key) {
            return Ok(Ack::Duplicate);
        }
        delivered.insert(key.clone(), series.candles.clone());
        Ok(Ack::Delivered)
    }
}
