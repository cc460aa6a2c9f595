use std::fmt;

use candle_batch_core::store::escape_component;
use candle_batch_core::{Instrument, Resolution, TimeRange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One batch of work: the same range and resolution for many instruments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub instruments: Vec<Instrument>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resolution: Resolution,
    /// Caller-supplied id carried through logs and idempotency keys.
    pub correlation_id: String,
    /// Overrides `BatchConfig::strict_completeness` for this batch.
    #[serde(default)]
    pub strict: Option<bool>,
    /// Publish nothing unless every instrument assembles successfully.
    #[serde(default)]
    pub all_or_nothing: bool,
}

impl BatchRequest {
    pub fn new<I>(
        instruments: I,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution: Resolution,
        correlation_id: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Instrument>,
    {
        Self {
            instruments: instruments.into_iter().map(Into::into).collect(),
            start,
            end,
            resolution,
            correlation_id: correlation_id.into(),
            strict: None,
            all_or_nothing: false,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn with_all_or_nothing(mut self, all_or_nothing: bool) -> Self {
        self.all_or_nothing = all_or_nothing;
        self
    }
}

/// Stable key for one published series. Re-running a batch with the same
/// correlation id yields the same keys, so sinks can drop repeats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(
        correlation_id: &str,
        instrument: &Instrument,
        resolution: Resolution,
        range: &TimeRange,
    ) -> Self {
        // Escaping keeps ':' out of the free-form fields so keys stay unambiguous.
        Self(format!(
            "{}:{}:{resolution}:{}:{}",
            escape_component(correlation_id),
            escape_component(instrument.as_str()),
            range.start().timestamp(),
            range.end().timestamp()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::at;

    #[test]
    fn key_is_stable_and_distinct() {
        let range = TimeRange::new(at(0, 0), at(0, 10)).unwrap();
        let eur = Instrument::new("EUR_USD");
        let gbp = Instrument::new("GBP_USD");

        let a = IdempotencyKey::derive("run-1", &eur, Resolution::M1, &range);
        let b = IdempotencyKey::derive("run-1", &eur, Resolution::M1, &range);
        assert_eq!(a, b);

        assert_ne!(a, IdempotencyKey::derive("run-1", &gbp, Resolution::M1, &range));
        assert_ne!(a, IdempotencyKey::derive("run-2", &eur, Resolution::M1, &range));
        assert_ne!(a, IdempotencyKey::derive("run-1", &eur, Resolution::M5, &range));
        assert!(a.as_str().starts_with("run-1:EUR_USD:M1:"));
    }

    #[test]
    fn separators_inside_fields_do_not_collide() {
        let range = TimeRange::new(at(0, 0), at(0, 5)).unwrap();
        let a = IdempotencyKey::derive("run:X", &Instrument::new("Y"), Resolution::M1, &range);
        let b = IdempotencyKey::derive("run", &Instrument::new("X:Y"), Resolution::M1, &range);
        assert_ne!(a, b);
        assert!(b.as_str().starts_with("run:X%3AY:M1:"));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{
            "instruments": ["EUR_USD", "USD_JPY"],
            "start": "2025-01-15T00:00:00Z",
            "end": "2025-01-15T00:10:00Z",
            "resolution": "M1",
            "correlation_id": "nightly"
        }"#;
        let request: BatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.instruments.len(), 2);
        assert_eq!(request.start, at(0, 0));
        assert_eq!(request.strict, None);
        assert!(!request.all_or_nothing);
    }
}
