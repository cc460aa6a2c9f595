use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;

use crate::candle::Candle;
use crate::error::CandleError;
use crate::instrument::Instrument;
use crate::range::TimeRange;
use crate::resolution::Resolution;

const META_INSTRUMENT: &str = "candle_batch.instrument";
const META_RESOLUTION: &str = "candle_batch.resolution";
const META_START: &str = "candle_batch.start";
const META_END: &str = "candle_batch.end";

/// Identity of a stored series, kept in the Arrow schema metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesMetadata {
    pub instrument: Instrument,
    pub resolution: Resolution,
    pub range: TimeRange,
}

impl SeriesMetadata {
    fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (META_INSTRUMENT.to_string(), self.instrument.to_string()),
            (META_RESOLUTION.to_string(), self.resolution.to_string()),
            (META_START.to_string(), self.range.start().to_rfc3339()),
            (META_END.to_string(), self.range.end().to_rfc3339()),
        ])
    }

    fn from_map(map: &HashMap<String, String>) -> Result<Option<Self>, CandleError> {
        let Some(instrument) = map.get(META_INSTRUMENT) else {
            return Ok(None);
        };
        let field = |key: &str| {
            map.get(key)
                .ok_or_else(|| CandleError::InvalidData(format!("missing metadata key {key}")))
        };
        let instant = |key: &str| -> Result<_, CandleError> {
            let raw = field(key)?;
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| CandleError::InvalidData(format!("invalid {key} '{raw}': {e}")))
        };

        Ok(Some(Self {
            instrument: Instrument::new(instrument.clone()),
            resolution: field(META_RESOLUTION)?.parse()?,
            range: TimeRange::new(instant(META_START)?, instant(META_END)?)?,
        }))
    }
}

pub fn candle_schema(metadata: Option<&SeriesMetadata>) -> Schema {
    let fields = vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("open", DataType::Utf8, false),
        Field::new("high", DataType::Utf8, false),
        Field::new("low", DataType::Utf8, false),
        Field::new("close", DataType::Utf8, false),
        Field::new("volume", DataType::Int64, false),
    ];
    match metadata {
        Some(meta) => Schema::new_with_metadata(fields, meta.to_map()),
        None => Schema::new(fields),
    }
}

fn price_column(candles: &[Candle], price: impl Fn(&Candle) -> Decimal) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(
        candles.iter().map(|c| price(c).to_string()),
    ))
}

pub fn candles_to_record_batch(
    candles: &[Candle],
    metadata: Option<&SeriesMetadata>,
) -> Result<RecordBatch, CandleError> {
    let schema = Arc::new(candle_schema(metadata));

    let timestamps = TimestampMicrosecondArray::from_iter_values(
        candles.iter().map(|c| c.timestamp.timestamp_micros()),
    )
    .with_timezone("UTC");

    let columns: Vec<ArrayRef> = vec![
        Arc::new(timestamps),
        price_column(candles, |c| c.open),
        price_column(candles, |c| c.high),
        price_column(candles, |c| c.low),
        price_column(candles, |c| c.close),
        Arc::new(Int64Array::from_iter_values(candles.iter().map(|c| c.volume))),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, CandleError> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| CandleError::InvalidData(format!("expected {name} column")))
}

fn parse_price(raw: &str, name: &str) -> Result<Decimal, CandleError> {
    raw.parse()
        .map_err(|e| CandleError::InvalidData(format!("invalid {name} '{raw}': {e}")))
}

pub fn record_batch_to_candles(batch: &RecordBatch) -> Result<Vec<Candle>, CandleError> {
    let timestamps = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
    let opens = column::<StringArray>(batch, "open")?;
    let highs = column::<StringArray>(batch, "high")?;
    let lows = column::<StringArray>(batch, "low")?;
    let closes = column::<StringArray>(batch, "close")?;
    let volumes = column::<Int64Array>(batch, "volume")?;

    (0..batch.num_rows())
        .map(|i| {
            let micros = timestamps.value(i);
            let timestamp = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| CandleError::InvalidData(format!("invalid timestamp: {micros}")))?;

            Ok(Candle {
                timestamp,
                open: parse_price(opens.value(i), "open")?,
                high: parse_price(highs.value(i), "high")?,
                low: parse_price(lows.value(i), "low")?,
                close: parse_price(closes.value(i), "close")?,
                volume: volumes.value(i),
            })
        })
        .collect()
}

pub fn write_parquet(
    path: &Path,
    candles: &[Candle],
    metadata: Option<&SeriesMetadata>,
) -> Result<(), CandleError> {
    let batch = candles_to_record_batch(candles, metadata)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

/// Read a Parquet series file, returning its metadata when present.
pub fn read_parquet(path: &Path) -> Result<(Option<SeriesMetadata>, Vec<Candle>), CandleError> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let metadata = SeriesMetadata::from_map(builder.schema().metadata())?;
    let reader = builder.build()?;

    let mut all_candles = Vec::new();
    for batch in reader {
        all_candles.extend(record_batch_to_candles(&batch?)?);
    }

    Ok((metadata, all_candles))
}
