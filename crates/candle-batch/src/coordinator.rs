//! Drives one batch from request to terminal state.
//!
//! Planning → Dispatching → Assembling → Publishing → one of Completed,
//! PartiallyCompleted or Failed. The coordinator owns every assembly buffer;
//! workers only report chunk outcomes over a channel.

use std::sync::Arc;

use candle_batch_core::{Instrument, TimeRange};
use candle_batch_providers::CandleClient;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembler::{Assembler, AssemblyOptions};
use crate::config::BatchConfig;
use crate::dispatcher::Dispatcher;
use crate::error::BatchError;
use crate::planner::{self, ChunkPlan};
use crate::pool::WorkerPool;
use crate::publisher::Publisher;
use crate::request::{BatchRequest, IdempotencyKey};
use crate::retry::RetryPolicy;
use crate::series::{SeriesGap, SeriesStatus};
use crate::sink::{Ack, CandleSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchState {
    Planning,
    Dispatching,
    Assembling,
    Publishing,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::PartiallyCompleted | BatchState::Failed
        )
    }

    fn rank(self) -> u8 {
        match self {
            BatchState::Planning => 0,
            BatchState::Dispatching => 1,
            BatchState::Assembling => 2,
            BatchState::Publishing => 3,
            BatchState::Completed | BatchState::PartiallyCompleted | BatchState::Failed => 4,
        }
    }

    /// States only move forward, and nothing leaves a terminal state.
    pub fn can_advance_to(self, next: BatchState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstrumentStatus {
    /// Every slot present and published.
    Complete,
    /// Published with gaps.
    CompleteWithGaps,
    /// Not published: fetch, assembly, planning or withholding failed.
    Failed,
    /// Assembled but the sink never accepted it.
    PublishFailed,
}

impl InstrumentStatus {
    pub fn is_published(self) -> bool {
        matches!(
            self,
            InstrumentStatus::Complete | InstrumentStatus::CompleteWithGaps
        )
    }
}

#[derive(Debug)]
pub struct InstrumentOutcome {
    pub instrument: Instrument,
    pub status: InstrumentStatus,
    pub candles: usize,
    pub gaps: Vec<SeriesGap>,
    /// Why the instrument is not `Complete`. `None` for gap-only results.
    pub reason: Option<BatchError>,
    pub ack: Option<Ack>,
}

impl InstrumentOutcome {
    fn failed(instrument: Instrument, reason: BatchError) -> Self {
        Self {
            instrument,
            status: InstrumentStatus::Failed,
            candles: 0,
            gaps: Vec::new(),
            reason: Some(reason),
            ack: None,
        }
    }
}

/// Final status of a batch.
#[derive(Debug)]
pub struct BatchReport {
    pub correlation_id: String,
    pub state: BatchState,
    /// Every state the batch entered, in order.
    pub transitions: Vec<BatchState>,
    /// Effective range, when planning succeeded.
    pub range: Option<TimeRange>,
    pub outcomes: Vec<InstrumentOutcome>,
    /// Batch-wide failure, such as a planning error or an exhausted pool.
    pub error: Option<BatchError>,
}

impl BatchReport {
    pub fn outcome(&self, instrument: &str) -> Option<&InstrumentOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.instrument.as_str() == instrument)
    }

    pub fn published(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_published())
            .count()
    }
}

/// State tracker for a single run.
struct Run {
    correlation_id: String,
    state: BatchState,
    transitions: Vec<BatchState>,
    error: Option<BatchError>,
}

impl Run {
    fn new(correlation_id: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            state: BatchState::Planning,
            transitions: vec![BatchState::Planning],
            error: None,
        }
    }

    fn advance(&mut self, next: BatchState) -> Result<(), BatchError> {
        if !self.state.can_advance_to(next) {
            return Err(BatchError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(correlation_id = %self.correlation_id, from = ?self.state, to = ?next, "batch state change");
        self.state = next;
        self.transitions.push(next);
        Ok(())
    }

    fn finish(mut self, range: Option<TimeRange>, outcomes: Vec<InstrumentOutcome>) -> BatchReport {
        let terminal = if !self.state.is_terminal() {
            let published = outcomes.iter().filter(|o| o.status.is_published()).count();
            let terminal = if published == 0 || self.error.is_some() {
                BatchState::Failed
            } else if outcomes.iter().all(|o| o.status == InstrumentStatus::Complete) {
                BatchState::Completed
            } else {
                BatchState::PartiallyCompleted
            };
            if let Err(e) = self.advance(terminal) {
                error!(correlation_id = %self.correlation_id, "{e}");
                self.error.get_or_insert(e);
            }
            terminal
        } else {
            self.state
        };

        info!(
            correlation_id = %self.correlation_id,
            state = ?terminal,
            instruments = outcomes.len(),
            published = outcomes.iter().filter(|o| o.status.is_published()).count(),
            "batch finished"
        );

        BatchReport {
            correlation_id: self.correlation_id,
            state: self.state,
            transitions: self.transitions,
            range,
            outcomes,
            error: self.error,
        }
    }
}

/// Runs batches against one provider and one sink. All batches run by the
/// same coordinator share its rate budget.
pub struct Coordinator {
    config: BatchConfig,
    client: Arc<dyn CandleClient>,
    dispatcher: Arc<Dispatcher>,
    publisher: Publisher,
}

impl Coordinator {
    pub fn new(
        config: BatchConfig,
        client: Arc<dyn CandleClient>,
        sink: Arc<dyn CandleSink>,
    ) -> Result<Self, BatchError> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::from_config(&config));
        let publisher = Publisher::new(sink, RetryPolicy::from_config(&config), config.publish_timeout);
        Ok(Self {
            config,
            client,
            dispatcher,
            publisher,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn run(&self, request: BatchRequest) -> BatchReport {
        self.run_with_cancellation(request, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancellation(
        &self,
        request: BatchRequest,
        cancel: CancellationToken,
    ) -> BatchReport {
        let mut run = Run::new(&request.correlation_id);
        info!(
            correlation_id = %request.correlation_id,
            provider = self.client.name(),
            instruments = request.instruments.len(),
            resolution = %request.resolution,
            "batch started"
        );

        let plan = match planner::plan(&request, &self.config) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(correlation_id = %request.correlation_id, "planning failed: {e}");
                let outcomes = request
                    .instruments
                    .iter()
                    .map(|i| InstrumentOutcome::failed(i.clone(), e.clone()))
                    .collect();
                run.error = Some(e);
                return run.finish(None, outcomes);
            }
        };

        if let Err(e) = run.advance(BatchState::Dispatching) {
            return abort(run, &plan, e);
        }
        let options = AssemblyOptions {
            strict: request.strict.unwrap_or(self.config.strict_completeness),
            tolerate_chunk_failures: self.config.tolerate_chunk_failures,
        };
        let mut assembler = Assembler::new(&plan, options);
        if let Err(e) = self.fetch(&plan, &mut assembler, &cancel).await {
            return abort(run, &plan, e);
        }

        if let Err(e) = run.advance(BatchState::Assembling) {
            return abort(run, &plan, e);
        }
        let series = assembler.finish();

        if let Err(e) = run.advance(BatchState::Publishing) {
            return abort(run, &plan, e);
        }
        let withhold = request.all_or_nothing
            && (cancel.is_cancelled() || series.iter().any(|s| s.failure.is_some()));
        if withhold {
            warn!(correlation_id = %run.correlation_id, "all-or-nothing batch has failures, publishing nothing");
        }

        let mut outcomes = Vec::with_capacity(series.len());
        for mut series in series {
            let status = series.status();
            if status == SeriesStatus::Failed {
                let reason = series.failure.take().unwrap_or(BatchError::Cancelled);
                outcomes.push(InstrumentOutcome {
                    gaps: std::mem::take(&mut series.gaps),
                    ..InstrumentOutcome::failed(series.instrument, reason)
                });
                continue;
            }
            if withhold {
                outcomes.push(InstrumentOutcome::failed(series.instrument, BatchError::Withheld));
                continue;
            }

            let key = IdempotencyKey::derive(
                &run.correlation_id,
                &series.instrument,
                series.resolution,
                &series.range,
            );
            let published = self.publisher.publish(&series, &key).await;
            let candles = series.candles.len();
            let gaps = std::mem::take(&mut series.gaps);
            outcomes.push(match published {
                Ok(delivery) => InstrumentOutcome {
                    instrument: series.instrument,
                    status: if status == SeriesStatus::Complete {
                        InstrumentStatus::Complete
                    } else {
                        InstrumentStatus::CompleteWithGaps
                    },
                    candles,
                    gaps,
                    reason: None,
                    ack: Some(delivery.ack),
                },
                Err(e) => {
                    warn!(%key, "{e}");
                    InstrumentOutcome {
                        instrument: series.instrument,
                        status: InstrumentStatus::PublishFailed,
                        candles,
                        gaps,
                        reason: Some(e),
                        ack: None,
                    }
                }
            });
        }

        run.finish(Some(plan.range), outcomes)
    }

    /// Run the worker pool and feed every outcome to the assembler. Leaves
    /// no chunk unresolved unless the pool died on its own.
    async fn fetch(
        &self,
        plan: &ChunkPlan,
        assembler: &mut Assembler,
        cancel: &CancellationToken,
    ) -> Result<(), BatchError> {
        let pool = WorkerPool::new(
            Arc::clone(&self.client),
            Arc::clone(&self.dispatcher),
            &self.config,
        );
        let mut handle = pool.spawn(plan.chunks.clone(), cancel.clone());

        while let Some(outcome) = handle.next().await {
            assembler.accept(&outcome.chunk, outcome.result);
            if assembler.unresolved() == 0 {
                break;
            }
        }
        let panicked = handle.shutdown().await;

        let unresolved = assembler.unresolved();
        if unresolved == 0 {
            return Ok(());
        }
        if cancel.is_cancelled() {
            info!(unresolved, "batch cancelled with chunks outstanding");
            assembler.resolve_missing(|| BatchError::Cancelled);
            return Ok(());
        }
        error!(unresolved, panicked, "worker pool exhausted");
        Err(BatchError::PoolExhausted { unresolved })
    }
}

/// Fail every planned instrument with a copy of a batch-wide error.
fn abort(mut run: Run, plan: &ChunkPlan, err: BatchError) -> BatchReport {
    let outcomes = plan
        .instruments
        .iter()
        .map(|i| InstrumentOutcome::failed(i.clone(), err.clone()))
        .collect();
    if let Err(e) = run.advance(BatchState::Failed) {
        error!(correlation_id = %run.correlation_id, "{e}");
    }
    run.error = Some(err);
    run.finish(Some(plan.range), outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, MemorySink, ScriptedClient, at, candle};
    use candle_batch_core::Resolution;
    use std::time::Duration;

    fn config() -> BatchConfig {
        BatchConfig {
            max_page_span: Duration::from_secs(4 * 60),
            worker_pool_size: 3,
            jitter: false,
            ..BatchConfig::default()
        }
    }

    fn request(instruments: &[&str]) -> BatchRequest {
        BatchRequest::new(
            instruments.iter().copied(),
            at(0, 0),
            at(0, 10),
            Resolution::M1,
            "run-1",
        )
    }

    fn coordinator(
        config: BatchConfig,
        client: &Arc<ScriptedClient>,
        sink: &Arc<MemorySink>,
    ) -> Coordinator {
        Coordinator::new(config, client.clone(), sink.clone()).unwrap()
    }

    #[test]
    fn states_only_move_forward() {
        use BatchState::*;
        assert!(Planning.can_advance_to(Dispatching));
        assert!(Planning.can_advance_to(Failed));
        assert!(Publishing.can_advance_to(Completed));
        assert!(!Assembling.can_advance_to(Dispatching));
        assert!(!Publishing.can_advance_to(Publishing));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Completed));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BatchConfig {
            retry_attempts: 0,
            ..config()
        };
        let client = Arc::new(ScriptedClient::new());
        let sink = Arc::new(MemorySink::new());
        assert!(Coordinator::new(config, client, sink).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn complete_batch_publishes_every_instrument() {
        let client = Arc::new(ScriptedClient::new());
        let sink = Arc::new(MemorySink::new());
        let report = coordinator(config(), &client, &sink)
            .run(request(&["EUR_USD", "GBP_USD", "USD_JPY"]))
            .await;

        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(
            report.transitions,
            vec![
                BatchState::Planning,
                BatchState::Dispatching,
                BatchState::Assembling,
                BatchState::Publishing,
                BatchState::Completed,
            ]
        );
        assert_eq!(report.published(), 3);
        assert_eq!(client.calls().len(), 9);

        for instrument in ["EUR_USD", "GBP_USD", "USD_JPY"] {
            let outcome = report.outcome(instrument).unwrap();
            assert_eq!(outcome.status, InstrumentStatus::Complete);
            assert_eq!(outcome.candles, 10);
            assert_eq!(outcome.ack, Some(Ack::Delivered));

            let candles = sink.delivered_for(instrument).unwrap();
            let expected: Vec<_> = (0..10).map(|m| at(0, m)).collect();
            let actual: Vec<_> = candles.iter().map(|c| c.timestamp).collect();
            assert_eq!(actual, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_fails_only_its_instrument() {
        let client = Arc::new(ScriptedClient::new().failing(
            "GBP_USD",
            at(0, 4),
            Failure::Retryable,
            None,
        ));
        let sink = Arc::new(MemorySink::new());
        let report = coordinator(config(), &client, &sink)
            .run(request(&["EUR_USD", "GBP_USD", "USD_JPY"]))
            .await;

        assert_eq!(report.state, BatchState::PartiallyCompleted);
        assert_eq!(client.calls_for("GBP_USD", at(0, 4)), 3);

        let failed = report.outcome("GBP_USD").unwrap();
        assert_eq!(failed.status, InstrumentStatus::Failed);
        assert!(matches!(
            failed.reason,
            Some(BatchError::RetryableFetch { attempts: 3, .. })
        ));
        assert!(sink.delivered_for("GBP_USD").is_none());

        assert_eq!(report.outcome("EUR_USD").unwrap().status, InstrumentStatus::Complete);
        assert_eq!(report.outcome("USD_JPY").unwrap().status, InstrumentStatus::Complete);
        assert_eq!(sink.delivered().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gap_is_published_and_reported() {
        let client = Arc::new(ScriptedClient::new().without("EUR_USD", at(0, 5)));
        let sink = Arc::new(MemorySink::new());
        let report = coordinator(config(), &client, &sink)
            .run(request(&["EUR_USD", "GBP_USD"]))
            .await;

        assert_eq!(report.state, BatchState::PartiallyCompleted);
        let outcome = report.outcome("EUR_USD").unwrap();
        assert_eq!(outcome.status, InstrumentStatus::CompleteWithGaps);
        assert_eq!(outcome.candles, 9);
        assert_eq!(
            outcome.gaps,
            vec![SeriesGap {
                from: at(0, 5),
                to: at(0, 6)
            }]
        );
        assert!(outcome.reason.is_none());
        assert_eq!(sink.delivered_for("EUR_USD").unwrap().len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_batch_fails_gapped_instrument() {
        let client = Arc::new(ScriptedClient::new().without("EUR_USD", at(0, 5)));
        let sink = Arc::new(MemorySink::new());
        let report = coordinator(config(), &client, &sink)
            .run(request(&["EUR_USD", "GBP_USD"]).with_strict(true))
            .await;

        let outcome = report.outcome("EUR_USD").unwrap();
        assert_eq!(outcome.status, InstrumentStatus::Failed);
        assert!(matches!(outcome.reason, Some(BatchError::SeriesGap(_))));
        assert_eq!(outcome.gaps.len(), 1);
        assert!(sink.delivered_for("EUR_USD").is_none());
        assert_eq!(report.state, BatchState::PartiallyCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn planning_failure_fails_the_batch() {
        let client = Arc::new(ScriptedClient::new());
        let sink = Arc::new(MemorySink::new());
        let req = BatchRequest::new(["EUR_USD", "GBP_USD"], at(0, 5), at(0, 5), Resolution::M1, "r");
        let report = coordinator(config(), &client, &sink).run(req).await;

        assert_eq!(report.state, BatchState::Failed);
        assert_eq!(report.transitions, vec![BatchState::Planning, BatchState::Failed]);
        assert!(matches!(report.error, Some(BatchError::Validation(_))));
        assert_eq!(report.outcomes.len(), 2);
        assert!(
            report
                .outcomes
                .iter()
                .all(|o| matches!(o.reason, Some(BatchError::Validation(_))))
        );
        assert!(client.calls().is_empty());
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn all_or_nothing_withholds_everything() {
        let client = Arc::new(ScriptedClient::new().failing(
            "GBP_USD",
            at(0, 0),
            Failure::Permanent,
            None,
        ));
        let sink = Arc::new(MemorySink::new());
        let report = coordinator(config(), &client, &sink)
            .run(request(&["EUR_USD", "GBP_USD"]).with_all_or_nothing(true))
            .await;

        assert_eq!(report.state, BatchState::Failed);
        assert!(sink.delivered().is_empty());
        assert!(matches!(
            report.outcome("EUR_USD").unwrap().reason,
            Some(BatchError::Withheld)
        ));
        assert!(matches!(
            report.outcome("GBP_USD").unwrap().reason,
            Some(BatchError::NonRetryableFetch(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_new_work() {
        let client = Arc::new(ScriptedClient::new().with_latency(Duration::from_secs(1)));
        let sink = Arc::new(MemorySink::new());
        let config = BatchConfig {
            worker_pool_size: 1,
            max_page_span: Duration::from_secs(3_600),
            ..config()
        };
        let coordinator = coordinator(config, &client, &sink);
        let cancel = CancellationToken::new();

        let (report, ()) = tokio::join!(
            coordinator.run_with_cancellation(request(&["A", "B", "C"]), cancel.clone()),
            async {
                tokio::time::sleep(Duration::from_millis(1_500)).await;
                cancel.cancel();
            }
        );

        assert_eq!(client.calls().len(), 2);
        assert_eq!(report.outcome("A").unwrap().status, InstrumentStatus::Complete);
        assert_eq!(report.outcome("B").unwrap().status, InstrumentStatus::Complete);
        let c = report.outcome("C").unwrap();
        assert_eq!(c.status, InstrumentStatus::Failed);
        assert!(matches!(c.reason, Some(BatchError::Cancelled)));
        assert!(sink.delivered_for("C").is_none());
        assert_eq!(report.state, BatchState::PartiallyCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_pool_fails_the_batch() {
        let client = Arc::new(ScriptedClient::new().failing("A", at(0, 0), Failure::Panic, None));
        let sink = Arc::new(MemorySink::new());
        let config = BatchConfig {
            worker_pool_size: 1,
            ..config()
        };
        let report = coordinator(config, &client, &sink).run(request(&["A", "B"])).await;

        assert_eq!(report.state, BatchState::Failed);
        assert!(matches!(report.error, Some(BatchError::PoolExhausted { unresolved: 6 })));
        assert!(report.outcomes.iter().all(|o| {
            o.status == InstrumentStatus::Failed
                && matches!(o.reason, Some(BatchError::PoolExhausted { unresolved: 6 }))
        }));
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn instrument_with_only_tolerated_failures_is_not_published() {
        let client = Arc::new(
            ScriptedClient::new()
                .failing("A", at(0, 0), Failure::Permanent, None)
                .failing("A", at(0, 4), Failure::Permanent, None)
                .failing("A", at(0, 8), Failure::Permanent, None),
        );
        let sink = Arc::new(MemorySink::new());
        let config = BatchConfig {
            tolerate_chunk_failures: true,
            ..config()
        };
        let report = coordinator(config, &client, &sink).run(request(&["A"])).await;

        assert_eq!(report.state, BatchState::Failed);
        let outcome = report.outcome("A").unwrap();
        assert_eq!(outcome.status, InstrumentStatus::Failed);
        assert!(matches!(outcome.reason, Some(BatchError::NonRetryableFetch(_))));
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn off_stride_candle_from_provider_fails_its_instrument() {
        let stray = at(0, 2) + chrono::Duration::seconds(30);
        let client = Arc::new(ScriptedClient::new().with_extra("A", candle(stray)));
        let sink = Arc::new(MemorySink::new());
        let report = coordinator(config(), &client, &sink)
            .run(request(&["A", "B"]))
            .await;

        assert_eq!(report.state, BatchState::PartiallyCompleted);
        assert!(matches!(
            report.outcome("A").unwrap().reason,
            Some(BatchError::Misaligned { timestamp }) if timestamp == stray
        ));
        assert!(sink.delivered_for("A").is_none());
        assert_eq!(report.outcome("B").unwrap().status, InstrumentStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_publish_is_reported_per_instrument() {
        let client = Arc::new(ScriptedClient::new());
        let sink = Arc::new(MemorySink::new().rejecting());
        let report = coordinator(config(), &client, &sink)
            .run(request(&["EUR_USD"]))
            .await;

        let outcome = report.outcome("EUR_USD").unwrap();
        assert_eq!(outcome.status, InstrumentStatus::PublishFailed);
        assert!(matches!(outcome.reason, Some(BatchError::PublishFailure { .. })));
        assert_eq!(report.state, BatchState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_is_acknowledged_as_duplicate() {
        let client = Arc::new(ScriptedClient::new());
        let sink = Arc::new(MemorySink::new());
        let coordinator = coordinator(config(), &client, &sink);

        coordinator.run(request(&["EUR_USD", "GBP_USD"])).await;
        let again = coordinator.run(request(&["EUR_USD", "GBP_USD"])).await;

        assert_eq!(again.state, BatchState::Completed);
        assert!(again.outcomes.iter().all(|o| o.ack == Some(Ack::Duplicate)));
        assert_eq!(sink.delivered().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_respects_the_rate_budget() {
        let client = Arc::new(ScriptedClient::new());
        let sink = Arc::new(MemorySink::new());
        let config = BatchConfig {
            requests_per_window: 4,
            rate_window: Duration::from_secs(1),
            worker_pool_size: 6,
            max_page_span: Duration::from_secs(60),
            ..config()
        };
        let coordinator = coordinator(config, &client, &sink);
        let report = coordinator.run(request(&["A", "B"])).await;

        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(coordinator.dispatcher().granted(), 20);
        let mut instants: Vec<_> = client.calls().iter().map(|c| c.at).collect();
        instants.sort();
        for window in instants.windows(5) {
            assert!(window[4] - window[0] >= Duration::from_secs(1));
        }
    }
}
