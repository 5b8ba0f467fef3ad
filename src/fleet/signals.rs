//! Control Signal Channel
//!
//! Pause and abort requests for workers that can only be reached through
//! their heartbeat responses. Workers poll; nothing is pushed.

use crate::models::state_machine::is_terminal_state;
use crate::models::{Worker, WorkerStatus};
use crate::utils::lock_mutex_recover;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSignals {
    pub should_pause: bool,
    pub should_abort: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    pause: bool,
    abort: bool,
}

#[derive(Default)]
pub struct ControlSignalChannel {
    flags: Mutex<HashMap<String, Flags>>,
}

impl ControlSignalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self, worker_id: &str) {
        lock_mutex_recover(&self.flags)
            .entry(worker_id.to_string())
            .or_default()
            .pause = true;
    }

    pub fn clear_pause(&self, worker_id: &str) {
        if let Some(flags) = lock_mutex_recover(&self.flags).get_mut(worker_id) {
            flags.pause = false;
        }
    }

    /// Abort is sticky until the worker is forgotten
    pub fn request_abort(&self, worker_id: &str) {
        let mut flags = lock_mutex_recover(&self.flags);
        let entry = flags.entry(worker_id.to_string()).or_default();
        entry.abort = true;
        entry.pause = false;
        log::info!("[Signals] Abort requested for worker {}", worker_id);
    }

    /// Signals to deliver with the next heartbeat response
    pub fn signals_for(&self, worker: &Worker) -> ControlSignals {
        let flags = lock_mutex_recover(&self.flags)
            .get(&worker.id)
            .copied()
            .unwrap_or_default();

        let should_abort = flags.abort
            || matches!(worker.status, WorkerStatus::Error | WorkerStatus::Stopped);
        ControlSignals {
            should_pause: !should_abort
                && !is_terminal_state(worker.status)
                && (flags.pause || worker.status == WorkerStatus::Paused),
            should_abort,
        }
    }

    pub fn forget(&self, worker_id: &str) {
        lock_mutex_recover(&self.flags).remove(worker_id);
    }
}
