//! Data model and on-disk series store shared by the batch orchestrator,
//! the upstream clients and the CLI.

pub mod candle;
pub mod error;
pub mod instrument;
pub mod page;
pub mod range;
pub mod resolution;
pub mod schema;
pub mod store;

pub use candle::Candle;
pub use error::CandleError;
pub use instrument::Instrument;
pub use page::Page;
pub use range::TimeRange;
pub use resolution::Resolution;
