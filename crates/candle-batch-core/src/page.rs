use crate::candle::Candle;
use crate::instrument::Instrument;

/// One upstream response: candles in timestamp order plus an optional
/// continuation cursor meaning more data remains for the requested range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub instrument: Instrument,
    pub candles: Vec<Candle>,
    pub cursor: Option<String>,
}

impl Page {
    pub fn last(instrument: Instrument, candles: Vec<Candle>) -> Self {
        Self {
            instrument,
            candles,
            cursor: None,
        }
    }

    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}
