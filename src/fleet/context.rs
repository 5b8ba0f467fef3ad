//! Repository Context
//!
//! One coordinator scope per repository. Owns the configuration, registry,
//! provisioner, liveness monitor, signal channel and the spawn and merge
//! gates. Every command of the fleet surface is a method here.

use crate::config::{load_merged_config, FleetConfig, PartialFleetConfig};
use crate::error::{FleetError, FleetResult};
use crate::file_storage::{get_fleet_dir, init_fleet_dir};
use crate::fleet::heartbeat::{DeadWorker, HeartbeatMonitor};
use crate::fleet::merge_coordinator::{default_commit_message, MergeCoordinator, MergeRequest};
use crate::fleet::provisioner::{DestroyOutcome, WorkspaceProvisioner};
use crate::fleet::registry::{apply_transition, WorkerRegistry};
use crate::fleet::signals::ControlSignalChannel;
use crate::git::GitManager;
use crate::models::state_machine::{is_mergeable_state, is_terminal_state};
use crate::models::{MergeAttempt, MergeOutcome, NextTask, Worker, WorkerFilter, WorkerStatus};
use crate::utils::lock_mutex_recover;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LOCK_FILE: &str = "coordinator.lock";
const FALLBACK_TARGET_BRANCH: &str = "main";

/// Spawn parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub task_id: String,
    pub task_title: String,
    pub next_task_id: Option<String>,
    pub next_task_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnedWorker {
    pub worker_id: String,
    pub branch_name: String,
    pub workspace_path: String,
    pub start_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerList {
    pub workers: Vec<Worker>,
    pub max_workers: usize,
    pub active_count: usize,
    pub can_spawn: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadWorkerReport {
    pub dead_workers: Vec<DeadWorker>,
    pub total_active: usize,
    pub dead_count: usize,
}

/// A liveness signal from a worker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub message: Option<String>,
    pub progress: Option<u32>,
    /// When the worker sent it; defaults to arrival time
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub status: WorkerStatus,
    pub should_pause: bool,
    pub should_abort: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_task: Option<NextTask>,
    pub heartbeat_interval_secs: u64,
}

pub struct RepositoryContext {
    repo_path: PathBuf,
    config: FleetConfig,
    target_branch: String,
    registry: WorkerRegistry,
    provisioner: WorkspaceProvisioner,
    monitor: HeartbeatMonitor,
    signals: ControlSignalChannel,
    merger: MergeCoordinator,
    spawn_gate: Mutex<()>,
    _lock_file: File,
}

impl RepositoryContext {
    /// Open a repository with layered configuration (global, project, CLI)
    pub fn open(repo_path: &Path, cli: Option<PartialFleetConfig>) -> FleetResult<Self> {
        let root = repository_root(repo_path)?;
        let config =
            load_merged_config(Some(&root), cli).map_err(|e| FleetError::Config(e.to_string()))?;
        Self::open_with_config(&root, config)
    }

    /// Open a repository with an already-resolved configuration
    pub fn open_with_config(repo_path: &Path, config: FleetConfig) -> FleetResult<Self> {
        let repo_path = repository_root(repo_path)?;

        init_fleet_dir(&repo_path).map_err(FleetError::Storage)?;
        let lock_file = acquire_lock(&repo_path)?;

        let target_branch = match config.target_branch.clone() {
            Some(branch) => branch,
            None => GitManager::new(&repo_path)?
                .current_branch_name()?
                .unwrap_or_else(|| FALLBACK_TARGET_BRANCH.to_string()),
        };

        let provisioner = WorkspaceProvisioner::new(&repo_path, &config);
        let pruned = provisioner.prune_orphans();
        if pruned > 0 {
            log::info!("[Fleet] Pruned {} orphaned worktree(s)", pruned);
        }

        let registry = WorkerRegistry::open(&repo_path)?;

        log::info!(
            "[Fleet] Opened {:?} (target {}, max {} workers)",
            repo_path,
            target_branch,
            config.max_workers
        );

        Ok(Self {
            monitor: HeartbeatMonitor::from_config(&config.timeouts),
            merger: MergeCoordinator::new(&repo_path, &config),
            signals: ControlSignalChannel::new(),
            spawn_gate: Mutex::new(()),
            _lock_file: lock_file,
            repo_path,
            config,
            target_branch,
            registry,
            provisioner,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn target_branch(&self) -> &str {
        &self.target_branch
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Effective configuration
    pub fn get_fleet_config(&self) -> FleetConfig {
        let mut config = self.config.clone();
        config.target_branch = Some(self.target_branch.clone());
        config
    }

    /// Provision a workspace and register a pending worker for a task.
    /// Fails fast at capacity with nothing created.
    pub fn spawn_worker(&self, request: SpawnRequest) -> FleetResult<SpawnedWorker> {
        if request.next_task_id.is_none() && request.next_task_title.is_some() {
            return Err(FleetError::InvalidArgument(
                "nextTaskTitle requires nextTaskId".to_string(),
            ));
        }

        let _gate = lock_mutex_recover(&self.spawn_gate);

        let active = self.registry.count_active();
        if active >= self.config.max_workers {
            log::info!(
                "[Fleet] Refusing spawn of {}: {} of {} workers active",
                request.task_id,
                active,
                self.config.max_workers
            );
            return Err(FleetError::CapacityExceeded {
                max_workers: self.config.max_workers,
                active,
            });
        }

        let worker_id = uuid::Uuid::new_v4().to_string();
        let workspace = self.provisioner.create(
            &worker_id,
            &request.task_id,
            &request.task_title,
            &self.target_branch,
        )?;

        let mut worker = Worker::new(
            worker_id.clone(),
            request.task_id.clone(),
            request.task_title.clone(),
            workspace.branch_name.clone(),
            workspace.workspace_path.clone(),
            self.target_branch.clone(),
            Utc::now(),
        );
        if let Some(next_task_id) = request.next_task_id {
            worker.next_task_title = Some(request.next_task_title.unwrap_or_else(|| next_task_id.clone()));
            worker.next_task_id = Some(next_task_id);
        }

        if let Err(e) = self.registry.register(worker) {
            if let Err(cleanup) = self.provisioner.destroy(
                Path::new(&workspace.workspace_path),
                &workspace.branch_name,
                &self.target_branch,
                true,
                true,
            ) {
                log::warn!("[Fleet] Cleanup after failed registration: {}", cleanup);
            }
            return Err(e);
        }

        log::info!(
            "[Fleet] Spawned worker {} for task {} on {}",
            worker_id,
            request.task_id,
            workspace.branch_name
        );

        Ok(SpawnedWorker {
            worker_id,
            branch_name: workspace.branch_name,
            workspace_path: workspace.workspace_path,
            start_command: workspace.start_command,
        })
    }

    pub fn list_workers(&self, status: Option<WorkerStatus>) -> WorkerList {
        let workers = self.registry.list(&WorkerFilter {
            status,
            ..Default::default()
        });
        let active_count = self.registry.count_active();

        WorkerList {
            workers,
            max_workers: self.config.max_workers,
            active_count,
            can_spawn: active_count < self.config.max_workers,
        }
    }

    pub fn get_worker_status(&self, worker_id: &str) -> FleetResult<Worker> {
        self.registry.get(worker_id)
    }

    /// Worker whose workspace contains `path`
    pub fn find_by_workspace(&self, path: &Path) -> FleetResult<Worker> {
        self.registry
            .find_by_workspace(path)
            .ok_or_else(|| FleetError::not_found(&path.to_string_lossy()))
    }

    pub fn pause_worker(&self, worker_id: &str) -> FleetResult<Worker> {
        let worker = self
            .registry
            .set_status(worker_id, WorkerStatus::Paused, Utc::now())?;
        self.signals.request_pause(worker_id);
        log::info!("[Fleet] Paused worker {}", worker_id);
        Ok(worker)
    }

    pub fn resume_worker(&self, worker_id: &str) -> FleetResult<Worker> {
        let worker = self
            .registry
            .set_status(worker_id, WorkerStatus::Working, Utc::now())?;
        self.signals.clear_pause(worker_id);
        log::info!("[Fleet] Resumed worker {}", worker_id);
        Ok(worker)
    }

    pub async fn merge_worker(&self, request: MergeRequest) -> FleetResult<MergeAttempt> {
        let attempt = self
            .merger
            .attempt_merge(&self.registry, &self.provisioner, request)
            .await?;
        self.settle_signals(&attempt);
        Ok(attempt)
    }

    /// Record the worker's final summary and merge its branch
    pub async fn worker_complete(
        &self,
        worker_id: &str,
        summary: Option<String>,
    ) -> FleetResult<MergeAttempt> {
        let worker = self.registry.update(worker_id, |w| {
            if !is_mergeable_state(w.status) {
                return Err(FleetError::InvalidStateTransition {
                    worker_id: w.id.clone(),
                    from: w.status,
                    to: WorkerStatus::Merging,
                });
            }
            if let Some(ref summary) = summary {
                w.message = Some(summary.clone());
            }
            w.progress = 100;
            w.updated_at = Utc::now();
            Ok(())
        })?;

        let mut commit_message = default_commit_message(&worker);
        if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
            commit_message = format!("{}\n\n{}", commit_message, summary.trim());
        }

        let mut request = MergeRequest::new(worker_id);
        request.commit_message = Some(commit_message);
        self.merge_worker(request).await
    }

    pub async fn approve_merge(&self, worker_id: &str) -> FleetResult<MergeAttempt> {
        let attempt = self
            .merger
            .approve(&self.registry, &self.provisioner, worker_id)
            .await?;
        self.settle_signals(&attempt);
        Ok(attempt)
    }

    /// A merged worker moves on to its next task with a clean slate
    fn settle_signals(&self, attempt: &MergeAttempt) {
        if attempt.outcome == MergeOutcome::Merged {
            self.signals.clear_pause(&attempt.worker_id);
        }
    }

    pub async fn reject_merge(&self, worker_id: &str) -> FleetResult<Worker> {
        self.merger.reject(&self.registry, worker_id).await
    }

    /// Stop a worker, tear down its workspace and drop its record.
    ///
    /// Without `force` only terminal workers may be stopped. A cleanup
    /// failure leaves the record in place, stopped.
    pub async fn stop_worker(
        &self,
        worker_id: &str,
        force: bool,
        delete_branch: bool,
    ) -> FleetResult<DestroyOutcome> {
        let worker = self.registry.get(worker_id)?;
        if !force && !is_terminal_state(worker.status) {
            return Err(FleetError::InvalidStateTransition {
                worker_id: worker.id.clone(),
                from: worker.status,
                to: WorkerStatus::Stopped,
            });
        }

        // A merge may start between the read above and this update
        let _gate = self.merger.lock().await;

        let worker = self.registry.update(worker_id, |w| {
            if is_terminal_state(w.status) {
                return Ok(());
            }
            apply_transition(w, WorkerStatus::Stopped, Utc::now())?;
            w.resume_status = None;
            w.pending_merge = None;
            Ok(())
        })?;

        let outcome = self.provisioner.destroy(
            Path::new(&worker.workspace_path),
            &worker.branch_name,
            &worker.target_branch,
            delete_branch,
            force,
        )?;

        self.registry.remove(worker_id)?;
        self.signals.forget(worker_id);

        log::info!(
            "[Fleet] Stopped worker {} (workspace removed: {}, branch deleted: {})",
            worker_id,
            outcome.workspace_removed,
            outcome.branch_deleted
        );

        Ok(outcome)
    }

    pub fn list_dead_workers(&self, threshold_ms: Option<u64>) -> DeadWorkerReport {
        self.list_dead_workers_at(threshold_ms, Utc::now())
    }

    pub fn list_dead_workers_at(&self, threshold_ms: Option<u64>, now: DateTime<Utc>) -> DeadWorkerReport {
        let active = self.registry.list(&WorkerFilter {
            active_only: true,
            ..Default::default()
        });
        let dead_workers = self.monitor.list_dead(&active, threshold_ms, now);

        DeadWorkerReport {
            dead_count: dead_workers.len(),
            total_active: active.len(),
            dead_workers,
        }
    }

    /// Record a heartbeat and answer with the worker's pending signals.
    /// Worker clocks are not trusted past the coordinator's own.
    pub fn heartbeat(&self, request: HeartbeatRequest) -> FleetResult<HeartbeatResponse> {
        let now = Utc::now();
        let at = request.timestamp.map_or(now, |sent| sent.min(now));
        let update = self.registry.update_heartbeat(
            &request.worker_id,
            at,
            request.message,
            request.progress,
        )?;

        let signals = self.signals.signals_for(&update.worker);
        Ok(HeartbeatResponse {
            status: update.worker.status,
            should_pause: signals.should_pause,
            should_abort: signals.should_abort,
            next_task: update.worker.next_task(),
            heartbeat_interval_secs: self.config.timeouts.heartbeat_interval_secs,
        })
    }

    pub fn assign_next_task(&self, worker_id: &str, task_id: &str, task_title: &str) -> FleetResult<Worker> {
        let worker = self
            .registry
            .assign_next_task(worker_id, task_id, task_title, Utc::now())?;
        log::info!("[Fleet] Queued task {} after worker {}", task_id, worker_id);
        Ok(worker)
    }

    /// Raise the sticky abort flag for a non-terminal worker
    pub fn abort_worker(&self, worker_id: &str) -> FleetResult<Worker> {
        let worker = self.registry.get(worker_id)?;
        if is_terminal_state(worker.status) {
            return Err(FleetError::InvalidStateTransition {
                worker_id: worker.id.clone(),
                from: worker.status,
                to: WorkerStatus::Stopped,
            });
        }
        self.signals.request_abort(worker_id);
        Ok(worker)
    }

    /// Move a worker to `error`, recording why
    pub async fn fail_worker(&self, worker_id: &str, reason: &str) -> FleetResult<Worker> {
        let _gate = self.merger.lock().await;

        let worker = self.registry.update(worker_id, |w| {
            apply_transition(w, WorkerStatus::Error, Utc::now())?;
            w.error_message = Some(reason.to_string());
            w.resume_status = None;
            w.pending_merge = None;
            Ok(())
        })?;

        log::warn!("[Fleet] Worker {} failed: {}", worker_id, reason);
        Ok(worker)
    }
}

/// Canonical working-tree root of the repository containing `path`
pub fn repository_root(path: &Path) -> FleetResult<PathBuf> {
    let repo = git2::Repository::discover(path)?;
    let root = repo
        .workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| FleetError::Config(format!("{:?} is a bare repository", path)))?;
    Ok(root.canonicalize().unwrap_or(root))
}

fn acquire_lock(repo_path: &Path) -> FleetResult<File> {
    let lock_path = get_fleet_dir(repo_path).join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| FleetError::Storage(format!("Failed to open {:?}: {}", lock_path, e)))?;

    file.try_lock_exclusive().map_err(|_| {
        FleetError::Storage(format!(
            "{:?} is already managed by another coordinator",
            repo_path
        ))
    })?;

    Ok(file)
}
