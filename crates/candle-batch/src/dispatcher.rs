use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::BatchConfig;
use crate::error::BatchError;

/// Shared request budget for every upstream call a coordinator makes.
///
/// Keeps a log of grant instants and never lets more than `limit` of them
/// fall inside any window of length `window`. Waiters queue on a tokio
/// `Mutex`, which is fair, so tokens are handed out in arrival order.
#[derive(Debug)]
pub struct Dispatcher {
    limit: usize,
    window: Duration,
    granted_at: Mutex<VecDeque<Instant>>,
    granted: AtomicU64,
}

impl Dispatcher {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        let limit = requests_per_window.max(1) as usize;
        Self {
            limit,
            window,
            granted_at: Mutex::new(VecDeque::with_capacity(limit)),
            granted: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.requests_per_window, config.rate_window)
    }

    /// Wait for a token. Fails once it is clear no token can be granted
    /// before `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), BatchError> {
        let started = Instant::now();
        let timed_out = || BatchError::RateLimitTimeout {
            waited: Instant::now().saturating_duration_since(started),
        };

        let mut log = tokio::time::timeout_at(deadline, self.granted_at.lock())
            .await
            .map_err(|_| timed_out())?;

        loop {
            let now = Instant::now();
            while log
                .front()
                .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= self.window)
            {
                log.pop_front();
            }

            if log.len() < self.limit {
                log.push_back(now);
                self.granted.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }

            let Some(oldest) = log.front().copied() else {
                continue;
            };
            let free_at = oldest + self.window;
            if free_at > deadline {
                return Err(timed_out());
            }
            trace!(wait = ?free_at.saturating_duration_since(now), "rate budget spent, waiting");
            tokio::time::sleep_until(free_at).await;
        }
    }

    /// Tokens granted so far.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }
}
