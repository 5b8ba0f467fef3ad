//! Heartbeat Monitor
//!
//! Classifies workers as alive or dead from the time since their last
//! heartbeat. Pending workers get a longer grace period than running ones
//! since they may still be booting.

use crate::config::TimeoutConfig;
use crate::models::state_machine::is_terminal_state;
use crate::models::{Worker, WorkerStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    Dead,
}

/// A worker that has gone silent past its timeout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadWorker {
    #[serde(flatten)]
    pub worker: Worker,
    pub silent_for_ms: i64,
    pub timeout_ms: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitor {
    pending_timeout: Duration,
    active_timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(pending_timeout: Duration, active_timeout: Duration) -> Self {
        Self {
            pending_timeout,
            active_timeout,
        }
    }

    pub fn from_config(timeouts: &TimeoutConfig) -> Self {
        Self::new(
            saturating_secs(timeouts.pending_timeout_secs),
            saturating_secs(timeouts.active_timeout_secs),
        )
    }

    /// Time since the worker was last heard from, never negative.
    /// Pending workers are measured from creation.
    pub fn silence(worker: &Worker, now: DateTime<Utc>) -> Duration {
        let since = match worker.status {
            WorkerStatus::Pending => worker.created_at,
            _ => worker.heartbeat_at,
        };
        (now - since).max(Duration::zero())
    }

    /// Timeout that applies to a worker, or None for terminal workers
    pub fn timeout_for(&self, worker: &Worker, active_override: Option<Duration>) -> Option<Duration> {
        if is_terminal_state(worker.status) {
            return None;
        }
        Some(match worker.status {
            WorkerStatus::Pending => self.pending_timeout,
            _ => active_override.unwrap_or(self.active_timeout),
        })
    }

    pub fn classify(&self, worker: &Worker, now: DateTime<Utc>) -> Liveness {
        match self.timeout_for(worker, None) {
            Some(timeout) if Self::silence(worker, now) > timeout => Liveness::Dead,
            _ => Liveness::Alive,
        }
    }

    /// Dead workers among `workers`, longest silent first.
    ///
    /// `threshold_ms` replaces the timeout of non-pending workers; pending
    /// workers always keep their boot grace period.
    pub fn list_dead<'a, I>(&self, workers: I, threshold_ms: Option<u64>, now: DateTime<Utc>) -> Vec<DeadWorker>
    where
        I: IntoIterator<Item = &'a Worker>,
    {
        let active_override = threshold_ms.map(saturating_millis);

        let mut dead: Vec<DeadWorker> = workers
            .into_iter()
            .filter_map(|worker| {
                let timeout = self.timeout_for(worker, active_override)?;
                let silence = Self::silence(worker, now);
                (silence > timeout).then(|| DeadWorker {
                    worker: worker.clone(),
                    silent_for_ms: silence.num_milliseconds(),
                    timeout_ms: timeout.num_milliseconds(),
                })
            })
            .collect();

        dead.sort_by(|a, b| {
            b.silent_for_ms
                .cmp(&a.silent_for_ms)
                .then_with(|| a.worker.id.cmp(&b.worker.id))
        });
        dead
    }
}

/// Out-of-range values become `Duration::MAX`, which no silence exceeds
fn saturating_millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

fn saturating_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}
