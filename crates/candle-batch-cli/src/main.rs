mod guard;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use candle_batch::{
    BatchConfig, BatchReport, BatchRequest, BatchState, Coordinator, InstrumentStatus, ParquetSink,
};
use candle_batch_core::store::CandleStore;
use candle_batch_core::{Instrument, Resolution};
use candle_batch_providers::CandleClient;
use candle_batch_providers::alpaca::AlpacaClient;
use candle_batch_providers::oanda::OandaClient;
use chrono::{DateTime, Datelike, SecondsFormat, Utc, Weekday};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::guard::{Admission, RunGuard};

#[derive(Parser)]
#[command(
    name = "candle-batch",
    about = "Fetch historical candles in rate-limited batches and manage the series store"
)]
struct Cli {
    /// Root directory for data storage (overrides the config file; default: current directory)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON config file with batch tuning, provider and disabled weekdays
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one range for many instruments and publish each series
    Run {
        /// Instruments to fetch (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        instruments: Vec<String>,

        /// Range start, RFC3339 (defaults to where the stored series end)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Range end, RFC3339 (defaults to now, floored to the resolution)
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Candle resolution, e.g. M1, H1, D
        #[arg(short, long, default_value = "M1")]
        resolution: Resolution,

        /// Data provider: oanda, alpaca (overrides the config file)
        #[arg(long)]
        provider: Option<String>,

        /// Id carried through logs and idempotency keys (re-use it to resume a batch)
        #[arg(long)]
        correlation_id: Option<String>,

        /// Fail any instrument whose series has gaps
        #[arg(long)]
        strict: bool,

        /// Publish nothing unless every instrument succeeds
        #[arg(long)]
        all_or_nothing: bool,

        /// Run even on a disabled weekday or within the minimum run interval
        #[arg(long)]
        force: bool,
    },

    /// Show which series exist in the store
    Status {
        /// Filter by instrument (shows all if omitted)
        #[arg(short, long)]
        instrument: Option<String>,
    },

    /// Validate stored series and report issues
    Validate {
        /// Instruments to validate (all if omitted, comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        instruments: Option<Vec<String>>,
    },
}

/// Settings read from `--config`. Command-line flags win over these.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct AppConfig {
    batch: BatchConfig,
    data_dir: Option<PathBuf>,
    provider: Option<String>,
    /// Weekdays on which `run` does nothing unless forced.
    disable_on_days: Vec<Weekday>,
    /// Zone whose calendar decides the weekday.
    timezone: Tz,
    /// Minimum time since the last successful run; zero disables the check.
    #[serde(with = "humantime_serde")]
    min_run_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            data_dir: None,
            provider: None,
            disable_on_days: Vec::new(),
            timezone: chrono_tz::America::Toronto,
            min_run_interval: Duration::from_secs(3600),
        }
    }
}

impl AppConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config
            .batch
            .validate()
            .with_context(|| format!("invalid batch settings in {}", path.display()))?;
        Ok(config)
    }

    fn local_weekday(&self, now: DateTime<Utc>) -> Weekday {
        now.with_timezone(&self.timezone).weekday()
    }

    fn is_disabled_at(&self, now: DateTime<Utc>) -> bool {
        self.disable_on_days.contains(&self.local_weekday(now))
    }
}

fn create_client(name: &str) -> Result<Arc<dyn CandleClient>> {
    match name {
        "oanda" => Ok(Arc::new(
            OandaClient::from_env().context("failed to create OANDA client")?,
        )),
        "alpaca" => Ok(Arc::new(
            AlpacaClient::from_env().context("failed to create Alpaca client")?,
        )),
        other => anyhow::bail!("unknown provider: {other}. Expected: oanda, alpaca"),
    }
}

fn exit_code(state: BatchState) -> u8 {
    match state {
        BatchState::Completed => 0,
        BatchState::PartiallyCompleted => 2,
        _ => 1,
    }
}

fn default_correlation_id(now: DateTime<Utc>) -> String {
    format!("batch-{}", now.format("%Y%m%dT%H%M%SZ"))
}

/// Where the stored series of every instrument end, taking the earliest so
/// no instrument is left with a hole.
fn resume_start(
    store: &CandleStore,
    instruments: &[Instrument],
    resolution: Resolution,
) -> Result<DateTime<Utc>> {
    let mut start: Option<DateTime<Utc>> = None;
    for instrument in instruments {
        let stored_end = store
            .list_ranges(instrument, resolution)
            .with_context(|| format!("failed to list series for {instrument} {resolution}"))?
            .iter()
            .map(|range| range.end())
            .max()
            .with_context(|| {
                format!("no stored {resolution} series for {instrument}; pass --start")
            })?;
        start = Some(start.map_or(stored_end, |s| s.min(stored_end)));
    }
    start.context("no instruments given")
}

struct RunArgs {
    instruments: Vec<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    resolution: Resolution,
    provider: Option<String>,
    correlation_id: Option<String>,
    strict: bool,
    all_or_nothing: bool,
    force: bool,
}

async fn cmd_run(
    data_dir: &Path,
    store: CandleStore,
    app: AppConfig,
    args: RunArgs,
) -> Result<ExitCode> {
    let now = Utc::now();
    if !args.force && app.is_disabled_at(now) {
        warn!(
            "runs are disabled on {} ({}), skipping (use --force to override)",
            app.local_weekday(now),
            app.timezone.name()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let min_interval = if args.force {
        Duration::ZERO
    } else {
        app.min_run_interval
    };
    let guard = match RunGuard::admit(data_dir, min_interval, now)? {
        Admission::Granted(guard) => guard,
        Admission::Busy(lock) => {
            info!("another run holds {}, exiting", lock.display());
            return Ok(ExitCode::SUCCESS);
        }
        Admission::TooSoon(last) => {
            info!("last successful run was at {last}, within {min_interval:?}, exiting");
            return Ok(ExitCode::SUCCESS);
        }
    };

    let instruments: Vec<Instrument> = args
        .instruments
        .iter()
        .map(|i| Instrument::new(i.to_uppercase()))
        .collect();
    let end = args.end.unwrap_or_else(|| args.resolution.floor(now));
    let start = match args.start {
        Some(start) => start,
        None => resume_start(&store, &instruments, args.resolution)?,
    };
    if start >= end {
        info!("stored series already reach {end}, nothing to fetch");
        return Ok(ExitCode::SUCCESS);
    }

    let provider = args
        .provider
        .or(app.provider)
        .unwrap_or_else(|| "oanda".to_string());
    let client = create_client(&provider)?;
    info!("Using provider: {}", client.name());

    let sink = Arc::new(ParquetSink::new(store));
    let coordinator =
        Coordinator::new(app.batch, client, sink).context("invalid batch configuration")?;

    let correlation_id = args
        .correlation_id
        .unwrap_or_else(|| default_correlation_id(now));
    let mut request = BatchRequest::new(
        instruments,
        start,
        end,
        args.resolution,
        correlation_id,
    )
    .with_all_or_nothing(args.all_or_nothing);
    if args.strict {
        request = request.with_strict(true);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling batch");
                cancel.cancel();
            }
        });
    }

    let report = coordinator.run_with_cancellation(request, cancel).await;
    print_report(&report);
    if report.published() > 0 {
        guard
            .record_success(Utc::now())
            .context("failed to record the successful run")?;
    }
    Ok(ExitCode::from(exit_code(report.state)))
}

fn print_report(report: &BatchReport) {
    println!("batch {}: {:?}", report.correlation_id, report.state);
    if let Some(range) = report.range {
        println!("range: {range}");
    }
    if let Some(error) = &report.error {
        println!("error: {error}");
    }

    for outcome in &report.outcomes {
        let ack = outcome
            .ack
            .map(|a| format!(" ({a:?})"))
            .unwrap_or_default();
        println!(
            "{}: {:?}, {} candle(s){ack}",
            outcome.instrument, outcome.status, outcome.candles
        );
        for gap in &outcome.gaps {
            println!("  gap: {gap}");
        }
        if let Some(reason) = &outcome.reason
            && outcome.status != InstrumentStatus::Complete
        {
            println!("  reason: {reason}");
        }
    }
}

fn cmd_status(store: &CandleStore, instrument: Option<&str>) -> Result<()> {
    let instruments = match instrument {
        Some(i) => vec![Instrument::new(i.to_uppercase())],
        None => store
            .list_instruments()
            .context("failed to list instruments")?,
    };

    if instruments.is_empty() {
        println!("No data in store.");
        return Ok(());
    }

    for instrument in &instruments {
        let resolutions = store
            .list_resolutions(instrument)
            .with_context(|| format!("failed to list resolutions for {instrument}"))?;

        if resolutions.is_empty() {
            println!("{instrument}: no data");
            continue;
        }

        for resolution in resolutions {
            let ranges = store
                .list_ranges(instrument, resolution)
                .with_context(|| format!("failed to list series for {instrument} {resolution}"))?;
            let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
                continue;
            };
            println!(
                "{instrument} {resolution}: {} series, {} to {}",
                ranges.len(),
                first.start().to_rfc3339_opts(SecondsFormat::Secs, true),
                last.end().to_rfc3339_opts(SecondsFormat::Secs, true)
            );
        }
    }

    Ok(())
}

fn cmd_validate(store: &CandleStore, instruments: Option<&[String]>) -> Result<()> {
    let instruments: Vec<Instrument> = match instruments {
        Some(list) => list.iter().map(|i| Instrument::new(i.to_uppercase())).collect(),
        None => store
            .list_instruments()
            .context("failed to list instruments")?,
    };

    if instruments.is_empty() {
        println!("No data to validate.");
        return Ok(());
    }

    let mut issues = 0;

    for instrument in &instruments {
        let resolutions = store
            .list_resolutions(instrument)
            .with_context(|| format!("failed to list resolutions for {instrument}"))?;

        for resolution in resolutions {
            let ranges = store
                .list_ranges(instrument, resolution)
                .with_context(|| format!("failed to list series for {instrument} {resolution}"))?;

            for range in &ranges {
                let label = format!("{instrument} {resolution} {range}");
                match store.read_series(instrument, resolution, range) {
                    Ok(candles) => {
                        if candles.is_empty() {
                            println!("WARN: {label}: empty file");
                            issues += 1;
                            continue;
                        }

                        if let Some(i) = (1..candles.len())
                            .find(|&i| candles[i].timestamp <= candles[i - 1].timestamp)
                        {
                            println!("WARN: {label}: timestamps not strictly ascending at index {i}");
                            issues += 1;
                        }

                        let off_stride = candles
                            .iter()
                            .filter(|c| !resolution.is_aligned(c.timestamp))
                            .count();
                        if off_stride > 0 {
                            println!("WARN: {label}: {off_stride} candle(s) off the {resolution} stride");
                            issues += 1;
                        }

                        let outside = candles.iter().filter(|c| !range.contains(c.timestamp)).count();
                        if outside > 0 {
                            println!("WARN: {label}: {outside} candle(s) outside the stored range");
                            issues += 1;
                        }

                        let missing = range.slot_count(resolution) - candles.len() as i64;
                        if missing > 0 {
                            println!("INFO: {label}: {missing} slot(s) without a candle");
                        }

                        let zero_volume = candles.iter().filter(|c| c.volume == 0).count();
                        if zero_volume > 0 {
                            println!("WARN: {label}: {zero_volume} candle(s) with zero volume");
                            issues += 1;
                        }
                    }
                    Err(e) => {
                        println!("ERROR: {label}: failed to read: {e}");
                        issues += 1;
                    }
                }
            }
        }
    }

    if issues == 0 {
        println!("All series valid.");
    } else {
        println!("{issues} issue(s) found.");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut app = AppConfig::load(cli.config.as_deref())?;
    let data_dir = cli
        .data_dir
        .or_else(|| app.data_dir.take())
        .unwrap_or_else(|| PathBuf::from("."));
    let store = CandleStore::new(&data_dir);

    match cli.command {
        Commands::Run {
            instruments,
            start,
            end,
            resolution,
            provider,
            correlation_id,
            strict,
            all_or_nothing,
            force,
        } => {
            let args = RunArgs {
                instruments,
                start,
                end,
                resolution,
                provider,
                correlation_id,
                strict,
                all_or_nothing,
                force,
            };
            cmd_run(&data_dir, store, app, args).await
        }
        Commands::Status { instrument } => {
            cmd_status(&store, instrument.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { instruments } => {
            cmd_validate(&store, instruments.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
