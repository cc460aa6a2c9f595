//! Bounded pool of fetch workers.
//!
//! Workers claim chunks from a shared queue, walk every page of a chunk
//! through the dispatcher, and send one [`ChunkOutcome`] per chunk back to
//! the coordinator. Workers never touch assembly state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use candle_batch_core::{Candle, Page};
use candle_batch_providers::{CandleClient, FetchError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::BatchConfig;
use crate::dispatcher::Dispatcher;
use crate::error::BatchError;
use crate::planner::Chunk;
use crate::retry::RetryPolicy;

/// Result of fetching one chunk.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunk: Chunk,
    pub result: Result<Vec<Candle>, BatchError>,
    pub pages: usize,
    /// Upstream calls made, retries included.
    pub calls: u32,
}

pub struct WorkerPool {
    worker: Arc<Worker>,
    size: usize,
}

struct Worker {
    client: Arc<dyn CandleClient>,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
    acquire_timeout: Duration,
    fetch_timeout: Duration,
}

/// Receiving side of a running pool.
pub struct PoolHandle {
    results: mpsc::UnboundedReceiver<ChunkOutcome>,
    workers: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(
        client: Arc<dyn CandleClient>,
        dispatcher: Arc<Dispatcher>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                client,
                dispatcher,
                retry: RetryPolicy::from_config(config),
                acquire_timeout: config.acquire_timeout,
                fetch_timeout: config.fetch_timeout,
            }),
            size: config.worker_pool_size.max(1),
        }
    }

    /// Start workers over `chunks`. Never more workers than chunks.
    pub fn spawn(&self, chunks: Vec<Chunk>, cancel: CancellationToken) -> PoolHandle {
        let count = self.size.min(chunks.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));
        let (tx, results) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for id in 0..count {
            let worker = Arc::clone(&self.worker);
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { worker.run(id, &queue, tx, cancel).await });
        }
        debug!(workers = count, "worker pool started");

        PoolHandle { results, workers }
    }
}

impl PoolHandle {
    /// Next finished chunk, or `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<ChunkOutcome> {
        self.results.recv().await
    }

    /// Wait for workers to exit. Returns how many ended in a panic.
    pub async fn shutdown(mut self) -> usize {
        self.results.close();
        let mut panicked = 0;
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                error!("fetch worker ended abnormally: {e}");
                panicked += 1;
            }
        }
        panicked
    }
}

fn claim(queue: &Mutex<VecDeque<Chunk>>) -> Option<Chunk> {
    queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
}

impl Worker {
    async fn run(
        &self,
        id: usize,
        queue: &Mutex<VecDeque<Chunk>>,
        tx: mpsc::UnboundedSender<ChunkOutcome>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                debug!(worker = id, "cancelled, not claiming more chunks");
                break;
            }
            let Some(chunk) = claim(queue) else {
                break;
            };
            let outcome = self.fetch_chunk(chunk, &cancel).await;
            if tx.send(outcome).is_err() {
                break;
            }
        }
        debug!(worker = id, "worker exiting");
    }

    /// Follow cursors until the chunk is covered or the provider stops.
    async fn fetch_chunk(&self, chunk: Chunk, cancel: &CancellationToken) -> ChunkOutcome {
        let mut candles = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        let mut calls = 0;

        let result = loop {
            if pages > 0 && cancel.is_cancelled() {
                break Err(BatchError::Cancelled);
            }
            let page = match self.fetch_page(&chunk, cursor.as_deref(), cancel, &mut calls).await {
                Ok(page) => page,
                Err(e) => break Err(e),
            };
            pages += 1;

            let covered = page
                .candles
                .last()
                .is_some_and(|c| c.timestamp + chunk.resolution.stride() >= chunk.range.end());
            candles.extend(page.candles);

            match page.cursor {
                Some(next) if !covered => {
                    if cursor.as_deref() == Some(next.as_str()) {
                        break Err(BatchError::from(FetchError::Malformed(format!(
                            "cursor '{next}' did not advance"
                        ))));
                    }
                    cursor = Some(next);
                }
                _ => break Ok(std::mem::take(&mut candles)),
            }
        };

        match &result {
            Ok(candles) => debug!(
                instrument = %chunk.instrument,
                chunk = chunk.index,
                range = %chunk.range,
                candles = candles.len(),
                pages,
                calls,
                "chunk fetched"
            ),
            Err(e) => warn!(
                instrument = %chunk.instrument,
                chunk = chunk.index,
                range = %chunk.range,
                calls,
                "chunk failed: {e}"
            ),
        }

        ChunkOutcome {
            chunk,
            result,
            pages,
            calls,
        }
    }

    /// One page, retried on transient errors. Every attempt spends a token.
    async fn fetch_page(
        &self,
        chunk: &Chunk,
        cursor: Option<&str>,
        cancel: &CancellationToken,
        calls: &mut u32,
    ) -> Result<Page, BatchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let deadline = Instant::now() + self.acquire_timeout;
            tokio::select! {
                acquired = self.dispatcher.acquire(deadline) => acquired?,
                _ = cancel.cancelled() => return Err(BatchError::Cancelled),
            }

            *calls += 1;
            let fetch = self.client.fetch_page(
                &chunk.instrument,
                chunk.resolution,
                chunk.range.start(),
                chunk.range.end(),
                cursor,
            );
            let result = match tokio::time::timeout(self.fetch_timeout, fetch).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
            };

            let err = match result {
                Ok(page) => return Ok(page),
                Err(err) if !err.is_retryable() => return Err(err.into()),
                Err(err) if attempt >= self.retry.attempts() => {
                    return Err(BatchError::RetryableFetch {
                        attempts: attempt,
                        source: Arc::new(err),
                    });
                }
                Err(err) => err,
            };

            let mut delay = self.retry.delay_after(attempt);
            if let FetchError::RateLimited { retry_after_secs } = &err {
                let hinted = Duration::from_secs(*retry_after_secs).min(self.retry.max_delay());
                delay = delay.max(hinted);
            }
            warn!(
                instrument = %chunk.instrument,
                range = %chunk.range,
                attempt,
                ?delay,
                "fetch failed, retrying: {err}"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(BatchError::Cancelled),
            }
        }
    }
}
