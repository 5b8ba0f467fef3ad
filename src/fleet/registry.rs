//! Worker Registry
//!
//! In-memory table of worker records, the single source of truth for which
//! workers exist and what they are doing. Every mutation runs under one lock
//! and is written to `.fleet/workers/` before the lock is released; a
//! mutation whose write fails leaves the table unchanged.

use crate::error::{FleetError, FleetResult};
use crate::file_storage::workers;
use crate::models::state_machine::{self, StateTransitionError};
use crate::models::{NextTask, Worker, WorkerFilter, WorkerStatus};
use crate::utils::lock_mutex_recover;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Result of applying a heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatUpdate {
    pub worker: Worker,
    /// False when the heartbeat was stale or the worker is terminal
    pub applied: bool,
}

pub struct WorkerRegistry {
    repo_path: PathBuf,
    workers: Mutex<HashMap<String, Worker>>,
}

impl WorkerRegistry {
    /// Open the registry for a repository, reloading persisted workers
    pub fn open(repo_path: &Path) -> FleetResult<Self> {
        let loaded = workers::load_all_workers(repo_path).map_err(FleetError::Storage)?;

        if !loaded.is_empty() {
            log::info!(
                "[Registry] Restored {} worker(s) for {:?}",
                loaded.len(),
                repo_path
            );
        }

        Ok(Self {
            repo_path: repo_path.to_path_buf(),
            workers: Mutex::new(loaded.into_iter().map(|w| (w.id.clone(), w)).collect()),
        })
    }

    /// Add a new worker record
    pub fn register(&self, worker: Worker) -> FleetResult<Worker> {
        let mut table = lock_mutex_recover(&self.workers);

        workers::save_worker_state(&self.repo_path, &worker).map_err(FleetError::Storage)?;
        table.insert(worker.id.clone(), worker.clone());

        log::debug!("[Registry] Registered worker {} ({})", worker.id, worker.task_id);
        Ok(worker)
    }

    pub fn get(&self, worker_id: &str) -> FleetResult<Worker> {
        lock_mutex_recover(&self.workers)
            .get(worker_id)
            .cloned()
            .ok_or_else(|| FleetError::not_found(worker_id))
    }

    /// Find the worker owning a workspace directory (or any path inside it)
    pub fn find_by_workspace(&self, path: &Path) -> Option<Worker> {
        let wanted = normalize(path);
        lock_mutex_recover(&self.workers)
            .values()
            .filter(|w| wanted.starts_with(normalize(Path::new(&w.workspace_path))))
            .max_by_key(|w| w.created_at)
            .cloned()
    }

    /// Workers matching a filter, oldest first
    pub fn list(&self, filter: &WorkerFilter) -> Vec<Worker> {
        let mut result: Vec<Worker> = lock_mutex_recover(&self.workers)
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        result
    }

    /// Number of workers counting against capacity
    pub fn count_active(&self) -> usize {
        lock_mutex_recover(&self.workers)
            .values()
            .filter(|w| w.is_active())
            .count()
    }

    /// Apply `f` to a copy of the worker and commit it if `f` succeeds and
    /// the copy is persisted. Returns the committed record.
    pub fn update<F>(&self, worker_id: &str, f: F) -> FleetResult<Worker>
    where
        F: FnOnce(&mut Worker) -> FleetResult<()>,
    {
        let mut table = lock_mutex_recover(&self.workers);
        let current = table
            .get(worker_id)
            .ok_or_else(|| FleetError::not_found(worker_id))?;

        let mut updated = current.clone();
        f(&mut updated)?;

        if &updated != current {
            workers::save_worker_state(&self.repo_path, &updated).map_err(FleetError::Storage)?;
            table.insert(worker_id.to_string(), updated.clone());
        }

        Ok(updated)
    }

    /// Move a worker through the state machine
    pub fn set_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> FleetResult<Worker> {
        self.update(worker_id, |worker| apply_transition(worker, status, now))
    }

    /// Record a liveness signal.
    ///
    /// Heartbeats older than the stored one are ignored entirely, as is any
    /// heartbeat for a terminal worker. The first heartbeat of a pending
    /// worker moves it to working.
    pub fn update_heartbeat(
        &self,
        worker_id: &str,
        at: DateTime<Utc>,
        message: Option<String>,
        progress: Option<u32>,
    ) -> FleetResult<HeartbeatUpdate> {
        let mut applied = true;

        let worker = self.update(worker_id, |worker| {
            if state_machine::is_terminal_state(worker.status) {
                applied = false;
                return Ok(());
            }
            if at < worker.heartbeat_at {
                log::debug!(
                    "[Registry] Ignoring stale heartbeat for {} ({} < {})",
                    worker.id,
                    at,
                    worker.heartbeat_at
                );
                applied = false;
                return Ok(());
            }

            worker.heartbeat_at = at;
            worker.updated_at = at;
            if let Some(message) = message {
                worker.message = Some(message);
            }
            if let Some(progress) = progress {
                worker.progress = progress.min(100) as u8;
            }
            if worker.status == WorkerStatus::Pending {
                apply_transition(worker, WorkerStatus::Working, at)?;
            }
            Ok(())
        })?;

        Ok(HeartbeatUpdate { worker, applied })
    }

    /// Pre-assign the follow-up task, replacing any unused assignment
    pub fn assign_next_task(
        &self,
        worker_id: &str,
        task_id: &str,
        task_title: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Worker> {
        self.update(worker_id, |worker| {
            if state_machine::is_terminal_state(worker.status) {
                return Err(FleetError::InvalidStateTransition {
                    worker_id: worker.id.clone(),
                    from: worker.status,
                    to: worker.status,
                });
            }
            worker.next_task_id = Some(task_id.to_string());
            worker.next_task_title = Some(task_title.to_string());
            worker.updated_at = now;
            Ok(())
        })
    }

    /// Clear and return the follow-up task
    pub fn take_next_task(&self, worker_id: &str, now: DateTime<Utc>) -> FleetResult<Option<NextTask>> {
        let mut taken = None;
        self.update(worker_id, |worker| {
            taken = take_next_task(worker, now);
            Ok(())
        })?;
        Ok(taken)
    }

    /// Remove a worker record and its state file
    pub fn remove(&self, worker_id: &str) -> FleetResult<Worker> {
        let mut table = lock_mutex_recover(&self.workers);
        if !table.contains_key(worker_id) {
            return Err(FleetError::not_found(worker_id));
        }

        workers::delete_worker_file(&self.repo_path, worker_id).map_err(FleetError::Storage)?;
        let removed = table
            .remove(worker_id)
            .ok_or_else(|| FleetError::not_found(worker_id))?;

        log::debug!("[Registry] Removed worker {}", worker_id);
        Ok(removed)
    }
}

/// Validate and apply a status change to a worker record
pub fn apply_transition(worker: &mut Worker, to: WorkerStatus, now: DateTime<Utc>) -> FleetResult<()> {
    worker.status = state_machine::transition_state(worker.status, to).map_err(
        |StateTransitionError::InvalidTransition { from, to }| FleetError::InvalidStateTransition {
            worker_id: worker.id.clone(),
            from,
            to,
        },
    )?;
    worker.updated_at = now;
    Ok(())
}

/// Clear the follow-up fields of a record, returning what they held
pub fn take_next_task(worker: &mut Worker, now: DateTime<Utc>) -> Option<NextTask> {
    let next = worker.next_task();
    if next.is_some() {
        worker.next_task_id = None;
        worker.next_task_title = None;
        worker.updated_at = now;
    }
    next
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn worker(id: &str, now: DateTime<Utc>) -> Worker {
        Worker::new(
            id.to_string(),
            format!("T.{}", id),
            "title".to_string(),
            format!("fleet/{}", id),
            format!("/tmp/fleet-test/{}", id),
            "main".to_string(),
            now,
        )
    }

    fn open_registry() -> (TempDir, WorkerRegistry) {
        let temp_dir = TempDir::new().unwrap();
        let registry = WorkerRegistry::open(temp_dir.path()).unwrap();
        (temp_dir, registry)
    }

    #[test]
    fn test_register_and_reload() {
        let (temp_dir, registry) = open_registry();
        let now = Utc::now();
        registry.register(worker("a", now)).unwrap();
        registry.register(worker("b", now + Duration::seconds(1))).unwrap();

        let reopened = WorkerRegistry::open(temp_dir.path()).unwrap();
        let ids: Vec<String> = reopened
            .list(&WorkerFilter::default())
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_temp_dir, registry) = open_registry();
        assert!(matches!(registry.get("nope"), Err(FleetError::NotFound { .. })));
    }

    #[test]
    fn test_first_heartbeat_starts_worker() {
        let (_temp_dir, registry) = open_registry();
        let now = Utc::now();
        registry.register(worker("a", now)).unwrap();

        let update = registry
            .update_heartbeat("a", now + Duration::seconds(5), Some("booting".into()), Some(250))
            .unwrap();
        assert!(update.applied);
        assert_eq!(update.worker.status, WorkerStatus::Working);
        assert_eq!(update.worker.progress, 100);
        assert_eq!(update.worker.message.as_deref(), Some("booting"));
    }

    #[test]
    fn test_stale_heartbeat_is_ignored() {
        let (_temp_dir, registry) = open_registry();
        let now = Utc::now();
        registry.register(worker("a", now)).unwrap();
        registry
            .update_heartbeat("a", now + Duration::seconds(10), None, Some(40))
            .unwrap();

        let update = registry
            .update_heartbeat("a", now + Duration::seconds(3), Some("late".into()), Some(90))
            .unwrap();
        assert!(!update.applied);
        assert_eq!(update.worker.heartbeat_at, now + Duration::seconds(10));
        assert_eq!(update.worker.progress, 40);
        assert!(update.worker.message.is_none());
    }

    #[test]
    fn test_invalid_transition_changes_nothing() {
        let (_temp_dir, registry) = open_registry();
        let now = Utc::now();
        registry.register(worker("a", now)).unwrap();

        let result = registry.set_status("a", WorkerStatus::Merged, now);
        assert!(matches!(
            result,
            Err(FleetError::InvalidStateTransition {
                from: WorkerStatus::Pending,
                to: WorkerStatus::Merged,
                ..
            })
        ));
        assert_eq!(registry.get("a").unwrap().status, WorkerStatus::Pending);
    }

    #[test]
    fn test_next_task_taken_once() {
        let (_temp_dir, registry) = open_registry();
        let now = Utc::now();
        registry.register(worker("a", now)).unwrap();

        registry.assign_next_task("a", "SD.4", "Follow-up", now).unwrap();
        registry.assign_next_task("a", "SD.5", "Replacement", now).unwrap();

        let taken = registry.take_next_task("a", now).unwrap().unwrap();
        assert_eq!(taken.task_id, "SD.5");
        assert!(registry.take_next_task("a", now).unwrap().is_none());
        assert!(registry.get("a").unwrap().next_task_id.is_none());
    }

    #[test]
    fn test_assign_next_task_rejects_terminal_worker() {
        let (_temp_dir, registry) = open_registry();
        let now = Utc::now();
        registry.register(worker("a", now)).unwrap();
        registry.set_status("a", WorkerStatus::Stopped, now).unwrap();

        let result = registry.assign_next_task("a", "SD.4", "t", now);
        assert!(matches!(result, Err(FleetError::InvalidStateTransition { .. })));
    }

    #[test]
    fn test_count_active_and_remove() {
        let (temp_dir, registry) = open_registry();
        let now = Utc::now();
        registry.register(worker("a", now)).unwrap();
        registry.register(worker("b", now)).unwrap();
        registry.set_status("b", WorkerStatus::Stopped, now).unwrap();
        assert_eq!(registry.count_active(), 1);

        registry.remove("b").unwrap();
        assert!(registry.get("b").is_err());
        assert!(!workers::get_worker_file_path(temp_dir.path(), "b").exists());
        assert!(matches!(registry.remove("b"), Err(FleetError::NotFound { .. })));
    }

    #[test]
    fn test_find_by_workspace_matches_subdirectories() {
        let (_temp_dir, registry) = open_registry();
        registry.register(worker("a", Utc::now())).unwrap();

        let found = registry
            .find_by_workspace(Path::new("/tmp/fleet-test/a/src/lib.rs"))
            .unwrap();
        assert_eq!(found.id, "a");
        assert!(registry.find_by_workspace(Path::new("/tmp/fleet-test/ab")).is_none());
    }
}
