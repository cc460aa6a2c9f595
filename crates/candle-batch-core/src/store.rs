use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::candle::Candle;
use crate::error::CandleError;
use crate::instrument::Instrument;
use crate::range::TimeRange;
use crate::resolution::Resolution;
use crate::schema::{self, SeriesMetadata};

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Filesystem-backed store for assembled candle series in Parquet format.
///
/// Layout:
/// - `{root}/data/{INSTRUMENT}/{RESOLUTION}/{start}_{end}.parquet`
/// - `{root}/ledger/{key}.ack`, one marker per acknowledged publish
///
/// Path components are percent-escaped so arbitrary instrument ids and keys
/// map to distinct file names.
pub struct CandleStore {
    root: PathBuf,
}

impl CandleStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join("ledger")
    }

    /// Path to the Parquet file holding one series.
    pub fn series_path(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        range: &TimeRange,
    ) -> PathBuf {
        self.data_dir()
            .join(escape_component(instrument.as_str()))
            .join(resolution.code())
            .join(format!(
                "{}_{}.parquet",
                range.start().format(STAMP_FORMAT),
                range.end().format(STAMP_FORMAT)
            ))
    }

    pub fn has_series(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        range: &TimeRange,
    ) -> bool {
        self.series_path(instrument, resolution, range).exists()
    }

    /// Write a series atomically: the file is staged next to its final path
    /// and renamed into place, so readers never observe a partial file.
    /// Overwrites an existing series for the same range.
    pub fn write_series(
        &self,
        metadata: &SeriesMetadata,
        candles: &[Candle],
    ) -> Result<PathBuf, CandleError> {
        let path = self.series_path(&metadata.instrument, metadata.resolution, &metadata.range);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let staging = path.with_extension("parquet.tmp");
        schema::write_parquet(&staging, candles, Some(metadata))?;
        std::fs::rename(&staging, &path)?;

        debug!(path = %path.display(), candles = candles.len(), "series written");
        Ok(path)
    }

    pub fn read_series(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        range: &TimeRange,
    ) -> Result<Vec<Candle>, CandleError> {
        let path = self.series_path(instrument, resolution, range);
        if !path.exists() {
            return Err(CandleError::NoData {
                instrument: instrument.clone(),
                range: range.to_string(),
            });
        }
        let (_, candles) = schema::read_parquet(&path)?;
        Ok(candles)
    }

    /// All instruments with at least one stored series, sorted.
    pub fn list_instruments(&self) -> Result<Vec<Instrument>, CandleError> {
        let mut instruments: Vec<Instrument> = subdirectories(&self.data_dir())?
            .into_iter()
            .map(|name| Instrument::new(unescape_component(&name)))
            .collect();
        instruments.sort();
        Ok(instruments)
    }

    pub fn list_resolutions(&self, instrument: &Instrument) -> Result<Vec<Resolution>, CandleError> {
        let dir = self.data_dir().join(escape_component(instrument.as_str()));
        let mut resolutions: Vec<Resolution> = subdirectories(&dir)?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        resolutions.sort();
        Ok(resolutions)
    }

    /// Stored ranges for one instrument and resolution, sorted by start.
    pub fn list_ranges(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
    ) -> Result<Vec<TimeRange>, CandleError> {
        let dir = self
            .data_dir()
            .join(escape_component(instrument.as_str()))
            .join(resolution.code());
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ranges = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let file_name = entry?.file_name();
            let name = file_name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".parquet")
                && let Some(range) = parse_range_stem(stem)
            {
                ranges.push(range);
            }
        }
        ranges.sort();
        Ok(ranges)
    }

    pub fn ack_path(&self, key: &str) -> PathBuf {
        self.ledger_dir()
            .join(format!("{}.ack", escape_component(key)))
    }

    pub fn is_acknowledged(&self, key: &str) -> bool {
        self.ack_path(key).exists()
    }

    /// Record an acknowledgement for `key`. Returns `false` when the key was
    /// already acknowledged; the marker is created with create-new semantics.
    pub fn record_ack(&self, key: &str, series_path: &Path) -> Result<bool, CandleError> {
        std::fs::create_dir_all(self.ledger_dir())?;
        let path = self.ack_path(key);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", series_path.display())?;
                file.sync_all()?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<String>, CandleError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn parse_stamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_range_stem(stem: &str) -> Option<TimeRange> {
    let (start, end) = stem.split_once('_')?;
    TimeRange::new(parse_stamp(start)?, parse_stamp(end)?).ok()
}

/// Percent-escape everything outside `[A-Za-z0-9._-]`. A component made
/// only of dots is escaped whole so it never names `.` or `..`.
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    if !raw.is_empty() && raw.bytes().all(|b| b == b'.') {
        for _ in raw.bytes() {
            out.push_str("%2E");
        }
        return out;
    }
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn unescape_component(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = escaped.get(i + 1..i + 3)
            && let Ok(value) = u8::from_str_radix(hex, 16)
        {
            out.push(value);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
