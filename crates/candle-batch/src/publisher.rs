use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::BatchError;
use crate::request::IdempotencyKey;
use crate::retry::RetryPolicy;
use crate::series::Series;
use crate::sink::{Ack, CandleSink, SinkError};

/// Hands assembled series to the sink, retrying transient failures under
/// the same idempotency key.
pub struct Publisher {
    sink: Arc<dyn CandleSink>,
    retry: RetryPolicy,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub ack: Ack,
    pub attempts: u32,
}

impl Publisher {
    pub fn new(sink: Arc<dyn CandleSink>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            sink,
            retry,
            timeout,
        }
    }

    pub async fn publish(
        &self,
        series: &Series,
        key: &IdempotencyKey,
    ) -> Result<Delivery, BatchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, self.sink.publish(series, key)).await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(self.timeout)),
            };

            match result {
                Ok(ack) => {
                    debug!(%key, sink = self.sink.name(), ?ack, attempt, "series published");
                    return Ok(Delivery { ack, attempts: attempt });
                }
                Err(err) if err.is_retryable() && attempt < self.retry.attempts() => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(%key, attempt, ?delay, "publish failed, retrying: {err}");
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    return Err(BatchError::PublishFailure {
                        attempts: attempt,
                        source: Arc::new(source),
                    });
                }
            }
        }
    }
}
