//! Single-run lock and minimum interval between successful runs.
//!
//! `run.lock` is created exclusively for the lifetime of a run and removed
//! when the guard drops. `last_success` holds the epoch second of the last
//! run that published anything.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

const LOCK_FILE: &str = "run.lock";
const STAMP_FILE: &str = "last_success";

pub enum Admission {
    Granted(RunGuard),
    /// Another run holds the lock.
    Busy(PathBuf),
    /// The last successful run is more recent than the minimum interval.
    TooSoon(DateTime<Utc>),
}

#[derive(Debug)]
pub struct RunGuard {
    lock_path: PathBuf,
    stamp_path: PathBuf,
}

impl RunGuard {
    /// Take the lock in `dir`, then check the last successful run. A zero
    /// `min_interval` skips the interval check.
    pub fn admit(dir: &Path, min_interval: Duration, now: DateTime<Utc>) -> Result<Admission> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let lock_path = dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(Admission::Busy(lock_path)),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create {}", lock_path.display()));
            }
        };
        writeln!(file, "{} {}", std::process::id(), now.timestamp())
            .with_context(|| format!("failed to write {}", lock_path.display()))?;

        let guard = RunGuard {
            lock_path,
            stamp_path: dir.join(STAMP_FILE),
        };
        debug!(lock = %guard.lock_path.display(), "run lock acquired");

        if let Some(last) = guard.last_success()
            && !min_interval.is_zero()
            && now.signed_duration_since(last).to_std().unwrap_or_default() < min_interval
        {
            return Ok(Admission::TooSoon(last));
        }
        Ok(Admission::Granted(guard))
    }

    /// When the last successful run finished, if one was recorded.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(&self.stamp_path).ok()?;
        match raw.trim().parse::<i64>() {
            Ok(secs) => DateTime::from_timestamp(secs, 0),
            Err(e) => {
                warn!(path = %self.stamp_path.display(), "ignoring unreadable run stamp: {e}");
                None
            }
        }
    }

    pub fn record_success(&self, at: DateTime<Utc>) -> Result<()> {
        let staging = self.stamp_path.with_extension("tmp");
        std::fs::write(&staging, at.timestamp().to_string())
            .with_context(|| format!("failed to write {}", staging.display()))?;
        std::fs::rename(&staging, &self.stamp_path)
            .with_context(|| format!("failed to update {}", self.stamp_path.display()))?;
        Ok(())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!(lock = %self.lock_path.display(), "failed to release run lock: {e}");
        }
    }
}
