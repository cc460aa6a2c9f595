//! Upstream clients for paginated historical candle fetches.

pub mod alpaca;
pub mod error;
mod http;
pub mod oanda;
pub mod provider;

pub use error::FetchError;
pub use provider::CandleClient;
