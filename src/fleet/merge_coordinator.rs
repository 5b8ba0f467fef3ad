//! Merge Coordinator
//!
//! Integrates worker branches into their target branch. Every attempt starts
//! with an in-memory dry run; the target is written only when the dry run is
//! clean (and approved, when approval is required). All target writes go
//! through one async gate per repository.

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::fleet::provisioner::WorkspaceProvisioner;
use crate::fleet::registry::{apply_transition, take_next_task, WorkerRegistry};
use crate::git::{DryRunResult, GitManager};
use crate::models::state_machine::is_mergeable_state;
use crate::models::{
    MergeAttempt, MergeOutcome, MergeStrategy, PendingMerge, Worker, WorkerStatus,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Parameters of one merge request
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub worker_id: String,
    /// Defaults to the worker's own target branch
    pub target_branch: Option<String>,
    /// Defaults to the configured strategy
    pub strategy: Option<MergeStrategy>,
    pub commit_message: Option<String>,
    /// False holds a clean merge for approval
    pub auto_merge: bool,
}

impl MergeRequest {
    pub fn new(worker_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            target_branch: None,
            strategy: None,
            commit_message: None,
            auto_merge: true,
        }
    }
}

pub struct MergeCoordinator {
    repo_path: PathBuf,
    gate: Mutex<()>,
    merge_timeout: Duration,
    default_strategy: MergeStrategy,
    require_approval: bool,
    delete_branch_on_merge: bool,
}

impl MergeCoordinator {
    pub fn new(repo_path: &Path, config: &FleetConfig) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            gate: Mutex::new(()),
            merge_timeout: Duration::from_secs(config.timeouts.merge_timeout_secs),
            default_strategy: config.merge_strategy,
            require_approval: config.require_approval,
            delete_branch_on_merge: config.delete_branch_on_merge,
        }
    }

    pub fn with_merge_timeout(mut self, timeout: Duration) -> Self {
        self.merge_timeout = timeout;
        self
    }

    /// Hold the merge gate while stopping or failing a worker
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Dry-run a worker branch against its target and integrate it when clean
    pub async fn attempt_merge(
        &self,
        registry: &WorkerRegistry,
        provisioner: &WorkspaceProvisioner,
        request: MergeRequest,
    ) -> FleetResult<MergeAttempt> {
        let _gate = self.gate.lock().await;

        let worker = registry.get(&request.worker_id)?;
        if !is_mergeable_state(worker.status) {
            return Err(FleetError::InvalidStateTransition {
                worker_id: worker.id.clone(),
                from: worker.status,
                to: WorkerStatus::Merging,
            });
        }

        let target_branch = request
            .target_branch
            .clone()
            .unwrap_or_else(|| worker.target_branch.clone());
        let strategy = request.strategy.unwrap_or(self.default_strategy);

        ensure_committed(&worker)?;

        let worker = registry.update(&worker.id, |w| {
            let previous = w.status;
            apply_transition(w, WorkerStatus::Merging, Utc::now())?;
            w.resume_status = Some(previous);
            Ok(())
        })?;

        log::info!(
            "[MergeCoordinator] Merging worker {} ({}) into {} with {}",
            worker.id,
            worker.branch_name,
            target_branch,
            strategy
        );

        let mut attempt = MergeAttempt::new(&worker.id, &target_branch, strategy);

        let dry_run = match self.dry_run(&worker, &target_branch).await {
            Ok(dry_run) => dry_run,
            Err(e) => {
                self.restore(registry, &worker.id);
                return Err(e);
            }
        };

        if !dry_run.is_clean() {
            log::info!(
                "[MergeCoordinator] Worker {} conflicts with {} in {} file(s)",
                worker.id,
                target_branch,
                dry_run.conflicts.len()
            );
            self.rollback(registry, &worker.id)?;
            attempt.outcome = MergeOutcome::Conflict;
            attempt.conflicts = dry_run.conflicts;
            return Ok(attempt);
        }

        if self.require_approval || !request.auto_merge {
            let pending = PendingMerge {
                target_branch: target_branch.clone(),
                strategy,
                commit_message: request.commit_message.clone(),
                requested_at: Utc::now(),
            };
            registry.update(&worker.id, |w| {
                w.pending_merge = Some(pending);
                w.updated_at = Utc::now();
                Ok(())
            })?;

            log::info!("[MergeCoordinator] Worker {} is clean, awaiting approval", worker.id);
            attempt.outcome = MergeOutcome::PendingApproval;
            return Ok(attempt);
        }

        let message = request
            .commit_message
            .unwrap_or_else(|| default_commit_message(&worker));
        self.finish(registry, provisioner, &worker, attempt, &dry_run, &message)
            .await
    }

    /// Integrate a merge held for approval, re-checking against the current tip
    pub async fn approve(
        &self,
        registry: &WorkerRegistry,
        provisioner: &WorkspaceProvisioner,
        worker_id: &str,
    ) -> FleetResult<MergeAttempt> {
        let _gate = self.gate.lock().await;

        let worker = registry.get(worker_id)?;
        let pending = awaiting_approval(&worker)?;
        let mut attempt = MergeAttempt::new(&worker.id, &pending.target_branch, pending.strategy);

        ensure_committed(&worker)?;

        let dry_run = match self.dry_run(&worker, &pending.target_branch).await {
            Ok(dry_run) => dry_run,
            Err(e) => {
                self.restore(registry, &worker.id);
                return Err(e);
            }
        };

        if !dry_run.is_clean() {
            log::info!(
                "[MergeCoordinator] Approved merge of {} now conflicts with {}",
                worker.id,
                pending.target_branch
            );
            self.rollback(registry, &worker.id)?;
            attempt.outcome = MergeOutcome::Conflict;
            attempt.conflicts = dry_run.conflicts;
            return Ok(attempt);
        }

        let message = pending
            .commit_message
            .clone()
            .unwrap_or_else(|| default_commit_message(&worker));
        self.finish(registry, provisioner, &worker, attempt, &dry_run, &message)
            .await
    }

    /// Drop a merge held for approval and return the worker to its previous status
    pub async fn reject(&self, registry: &WorkerRegistry, worker_id: &str) -> FleetResult<Worker> {
        let _gate = self.gate.lock().await;

        let worker = registry.get(worker_id)?;
        awaiting_approval(&worker)?;

        log::info!("[MergeCoordinator] Merge of worker {} rejected", worker_id);
        self.rollback(registry, worker_id)
    }

    async fn dry_run(&self, worker: &Worker, target_branch: &str) -> FleetResult<DryRunResult> {
        let repo_path = self.repo_path.clone();
        let source = worker.branch_name.clone();
        let target = target_branch.to_string();

        let result = run_bounded(self.merge_timeout, move || {
            let git_manager = GitManager::new(&repo_path)?;
            Ok(git_manager.dry_run_merge(&source, &target)?)
        })
        .await;

        match result {
            Some(result) => result,
            None => {
                log::warn!(
                    "[MergeCoordinator] Dry run for worker {} exceeded {:?}",
                    worker.id,
                    self.merge_timeout
                );
                Err(FleetError::MergeTimeout {
                    worker_id: worker.id.clone(),
                    timeout_secs: self.merge_timeout.as_secs(),
                })
            }
        }
    }

    async fn finish(
        &self,
        registry: &WorkerRegistry,
        provisioner: &WorkspaceProvisioner,
        worker: &Worker,
        mut attempt: MergeAttempt,
        dry_run: &DryRunResult,
        message: &str,
    ) -> FleetResult<MergeAttempt> {
        let repo_path = self.repo_path.clone();
        let source = worker.branch_name.clone();
        let target = attempt.target_branch.clone();
        let strategy = attempt.strategy;
        let message = message.to_string();
        let expected = dry_run.target_tip;

        let integrated = tokio::task::spawn_blocking(move || -> FleetResult<_> {
            let git_manager = GitManager::new(&repo_path)?;
            Ok(git_manager.integrate(&source, &target, strategy, &message, expected)?)
        })
        .await
        .map_err(|e| FleetError::Git(git2::Error::from_str(&format!("Merge task failed: {}", e))))
        .and_then(|result| result);

        let integrated = match integrated {
            Ok(integrated) => integrated,
            Err(e) => {
                log::warn!("[MergeCoordinator] Integration of worker {} failed: {}", worker.id, e);
                self.restore(registry, &worker.id);
                return Err(e);
            }
        };

        if !integrated.conflicts.is_empty() {
            log::info!(
                "[MergeCoordinator] Replaying worker {} onto {} conflicted",
                worker.id,
                attempt.target_branch
            );
            self.rollback(registry, &worker.id)?;
            attempt.outcome = MergeOutcome::Conflict;
            attempt.conflicts = integrated.conflicts;
            return Ok(attempt);
        }

        let mut next_task = None;
        let merged = registry.update(&worker.id, |w| {
            let now = Utc::now();
            apply_transition(w, WorkerStatus::Merged, now)?;
            w.resume_status = None;
            w.pending_merge = None;
            w.progress = 100;
            next_task = take_next_task(w, now);
            Ok(())
        })?;

        attempt.outcome = MergeOutcome::Merged;
        attempt.commit_id = integrated.commit_id.map(|oid| oid.to_string());
        attempt.next_task = next_task;

        log::info!(
            "[MergeCoordinator] Worker {} merged into {}{}",
            merged.id,
            attempt.target_branch,
            attempt
                .commit_id
                .as_ref()
                .map(|id| format!(" at {}", id))
                .unwrap_or_default()
        );

        attempt.workspace_removed = match provisioner.destroy(
            Path::new(&merged.workspace_path),
            &merged.branch_name,
            &attempt.target_branch,
            self.delete_branch_on_merge,
            true,
        ) {
            Ok(outcome) => outcome.workspace_removed,
            Err(FleetError::Destroy {
                workspace_removed,
                reason,
                ..
            }) => {
                log::warn!(
                    "[MergeCoordinator] Teardown after merge of {} incomplete: {}",
                    merged.id,
                    reason
                );
                workspace_removed
            }
            Err(e) => {
                log::warn!("[MergeCoordinator] Teardown after merge of {} failed: {}", merged.id, e);
                false
            }
        };

        Ok(attempt)
    }

    /// Return a merging worker to the status it had before the attempt
    fn rollback(&self, registry: &WorkerRegistry, worker_id: &str) -> FleetResult<Worker> {
        registry.update(worker_id, |w| {
            if w.status != WorkerStatus::Merging {
                return Ok(());
            }
            let resume = w.resume_status.unwrap_or(WorkerStatus::Working);
            apply_transition(w, resume, Utc::now())?;
            w.resume_status = None;
            w.pending_merge = None;
            Ok(())
        })
    }

    /// Rollback on an error path where the original error is what gets returned
    fn restore(&self, registry: &WorkerRegistry, worker_id: &str) {
        if let Err(e) = self.rollback(registry, worker_id) {
            log::warn!("[MergeCoordinator] Could not restore worker {}: {}", worker_id, e);
        }
    }
}

/// Default commit message for an integration
pub fn default_commit_message(worker: &Worker) -> String {
    format!("{}: {}", worker.task_id, worker.task_title)
}

fn ensure_committed(worker: &Worker) -> FleetResult<()> {
    let files = GitManager::new(&worker.workspace_path)?.uncommitted_files()?;
    if files.is_empty() {
        return Ok(());
    }
    Err(FleetError::UncommittedChanges {
        worker_id: worker.id.clone(),
        files,
    })
}

fn awaiting_approval(worker: &Worker) -> FleetResult<PendingMerge> {
    match (&worker.status, &worker.pending_merge) {
        (WorkerStatus::Merging, Some(pending)) => Ok(pending.clone()),
        _ => Err(FleetError::InvalidStateTransition {
            worker_id: worker.id.clone(),
            from: worker.status,
            to: WorkerStatus::Merged,
        }),
    }
}

/// Run blocking git work on the blocking pool, giving up after `timeout`.
/// Returns None on timeout; the work itself is left to finish on its own
/// and must not write anything.
async fn run_bounded<T, F>(timeout: Duration, f: F) -> Option<FleetResult<T>>
where
    T: Send + 'static,
    F: FnOnce() -> FleetResult<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, handle).await {
        Err(_) => None,
        Ok(Err(e)) => Some(Err(FleetError::Git(git2::Error::from_str(&format!(
            "Merge task failed: {}",
            e
        ))))),
        Ok(Ok(result)) => Some(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::test_support::{commit_file, init_repo};
    use crate::models::ConflictType;
    use tempfile::TempDir;

    struct Harness {
        repo: TempDir,
        registry: WorkerRegistry,
        provisioner: WorkspaceProvisioner,
        coordinator: MergeCoordinator,
    }

    fn harness(config: FleetConfig) -> Harness {
        let repo = init_repo();
        let registry = WorkerRegistry::open(repo.path()).unwrap();
        let provisioner = WorkspaceProvisioner::new(repo.path(), &config);
        let coordinator = MergeCoordinator::new(repo.path(), &config);
        Harness {
            repo,
            registry,
            provisioner,
            coordinator,
        }
    }

    impl Harness {
        fn spawn(&self, id: &str, task_id: &str) -> Worker {
            let workspace = self
                .provisioner
                .create(id, task_id, "title", "main")
                .unwrap();
            let worker = Worker::new(
                id.to_string(),
                task_id.to_string(),
                "title".to_string(),
                workspace.branch_name,
                workspace.workspace_path,
                "main".to_string(),
                Utc::now(),
            );
            self.registry.register(worker).unwrap();
            self.registry
                .set_status(id, WorkerStatus::Working, Utc::now())
                .unwrap()
        }

        fn main_tip(&self) -> git2::Oid {
            GitManager::new(self.repo.path()).unwrap().branch_tip("main").unwrap()
        }
    }

    #[tokio::test]
    async fn test_clean_squash_merge() {
        let h = harness(FleetConfig::default());
        let worker = h.spawn("w-1", "SD.3");
        commit_file(Path::new(&worker.workspace_path), "login.txt", "form\n", "add login");
        h.registry.assign_next_task("w-1", "SD.4", "Next", Utc::now()).unwrap();

        let attempt = h
            .coordinator
            .attempt_merge(&h.registry, &h.provisioner, MergeRequest::new("w-1"))
            .await
            .unwrap();

        assert_eq!(attempt.outcome, MergeOutcome::Merged);
        assert_eq!(attempt.next_task.unwrap().task_id, "SD.4");
        assert!(attempt.workspace_removed);
        assert_eq!(attempt.commit_id, Some(h.main_tip().to_string()));
        assert!(h.repo.path().join("login.txt").exists());

        let merged = h.registry.get("w-1").unwrap();
        assert_eq!(merged.status, WorkerStatus::Merged);
        assert!(merged.next_task_id.is_none());
        assert!(!GitManager::new(h.repo.path()).unwrap().branch_exists(&merged.branch_name));
    }

    #[tokio::test]
    async fn test_conflict_restores_status_and_leaves_target() {
        let h = harness(FleetConfig::default());
        let first = h.spawn("w-1", "SD.3");
        let second = h.spawn("w-2", "SD.4");
        h.registry.set_status("w-2", WorkerStatus::Paused, Utc::now()).unwrap();

        commit_file(Path::new(&first.workspace_path), "README.md", "first\n", "first");
        commit_file(Path::new(&second.workspace_path), "README.md", "second\n", "second");

        let attempt = h
            .coordinator
            .attempt_merge(&h.registry, &h.provisioner, MergeRequest::new("w-1"))
            .await
            .unwrap();
        assert_eq!(attempt.outcome, MergeOutcome::Merged);
        let tip = h.main_tip();

        let attempt = h
            .coordinator
            .attempt_merge(&h.registry, &h.provisioner, MergeRequest::new("w-2"))
            .await
            .unwrap();
        assert_eq!(attempt.outcome, MergeOutcome::Conflict);
        assert_eq!(attempt.conflicts.len(), 1);
        assert_eq!(attempt.conflicts[0].file, "README.md");
        assert_eq!(attempt.conflicts[0].conflict_type, ConflictType::Content);
        assert_eq!(h.main_tip(), tip);

        let worker = h.registry.get("w-2").unwrap();
        assert_eq!(worker.status, WorkerStatus::Paused);
        assert!(worker.resume_status.is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_changes_block_merge() {
        let h = harness(FleetConfig::default());
        let worker = h.spawn("w-1", "SD.3");
        std::fs::write(Path::new(&worker.workspace_path).join("scratch.txt"), "wip").unwrap();

        let result = h
            .coordinator
            .attempt_merge(&h.registry, &h.provisioner, MergeRequest::new("w-1"))
            .await;

        match result {
            Err(FleetError::UncommittedChanges { files, .. }) => {
                assert_eq!(files, vec!["scratch.txt".to_string()]);
            }
            other => panic!("expected UncommittedChanges, got {:?}", other),
        }
        assert_eq!(h.registry.get("w-1").unwrap().status, WorkerStatus::Working);
    }

    #[tokio::test]
    async fn test_pending_worker_cannot_merge() {
        let h = harness(FleetConfig::default());
        let workspace = h.provisioner.create("w-1", "SD.3", "t", "main").unwrap();
        h.registry
            .register(Worker::new(
                "w-1".into(),
                "SD.3".into(),
                "t".into(),
                workspace.branch_name,
                workspace.workspace_path,
                "main".into(),
                Utc::now(),
            ))
            .unwrap();

        let result = h
            .coordinator
            .attempt_merge(&h.registry, &h.provisioner, MergeRequest::new("w-1"))
            .await;
        assert!(matches!(
            result,
            Err(FleetError::InvalidStateTransition {
                from: WorkerStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_approval_flow() {
        let h = harness(FleetConfig {
            require_approval: true,
            ..Default::default()
        });
        let worker = h.spawn("w-1", "SD.3");
        commit_file(Path::new(&worker.workspace_path), "a.txt", "a\n", "a");
        let before = h.main_tip();

        let attempt = h
            .coordinator
            .attempt_merge(&h.registry, &h.provisioner, MergeRequest::new("w-1"))
            .await
            .unwrap();
        assert_eq!(attempt.outcome, MergeOutcome::PendingApproval);
        assert_eq!(h.main_tip(), before);

        let held = h.registry.get("w-1").unwrap();
        assert_eq!(held.status, WorkerStatus::Merging);
        assert!(held.pending_merge.is_some());

        let attempt = h
            .coordinator
            .approve(&h.registry, &h.provisioner, "w-1")
            .await
            .unwrap();
        assert_eq!(attempt.outcome, MergeOutcome::Merged);
        assert_ne!(h.main_tip(), before);
    }

    #[tokio::test]
    async fn test_reject_restores_previous_status() {
        let h = harness(FleetConfig::default());
        let worker = h.spawn("w-1", "SD.3");
        commit_file(Path::new(&worker.workspace_path), "a.txt", "a\n", "a");

        let mut request = MergeRequest::new("w-1");
        request.auto_merge = false;
        let attempt = h
            .coordinator
            .attempt_merge(&h.registry, &h.provisioner, request)
            .await
            .unwrap();
        assert_eq!(attempt.outcome, MergeOutcome::PendingApproval);

        let worker = h.coordinator.reject(&h.registry, "w-1").await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Working);
        assert!(worker.pending_merge.is_none());

        let again = h.coordinator.reject(&h.registry, "w-1").await;
        assert!(matches!(again, Err(FleetError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_timeout_restores_worker() {
        let h = harness(FleetConfig::default());
        let worker = h.spawn("w-1", "SD.3");
        commit_file(Path::new(&worker.workspace_path), "a.txt", "a\n", "a");
        h.registry.set_status("w-1", WorkerStatus::Paused, Utc::now()).unwrap();
        let before = h.main_tip();

        let coordinator = MergeCoordinator::new(h.repo.path(), &FleetConfig::default())
            .with_merge_timeout(Duration::ZERO);
        let result = coordinator
            .attempt_merge(&h.registry, &h.provisioner, MergeRequest::new("w-1"))
            .await;

        assert!(matches!(
            result,
            Err(FleetError::MergeTimeout { ref worker_id, .. }) if worker_id == "w-1"
        ));
        assert_eq!(h.main_tip(), before);
        let worker = h.registry.get("w-1").unwrap();
        assert_eq!(worker.status, WorkerStatus::Paused);
        assert!(worker.resume_status.is_none());
        assert!(Path::new(&worker.workspace_path).exists());
    }

    #[tokio::test]
    async fn test_run_bounded_times_out() {
        let result = run_bounded(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(result.is_none());

        let result = run_bounded(Duration::from_secs(5), || Ok(7)).await;
        assert_eq!(result.unwrap().unwrap(), 7);
    }

    #[test]
    fn test_default_commit_message() {
        let worker = Worker::new(
            "w".into(),
            "SD.3".into(),
            "Add login form".into(),
            "b".into(),
            "/p".into(),
            "main".into(),
            Utc::now(),
        );
        assert_eq!(default_commit_message(&worker), "SD.3: Add login form");
    }
}
