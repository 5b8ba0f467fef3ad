// Graceful shutdown: signal trapping and the summary of what is left behind

use crate::fleet::RepositoryContext;
use crate::models::{Worker, WorkerFilter, WorkerStatus};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shutdown flag shared by the signal handlers and the server loop
#[derive(Clone)]
pub struct ShutdownState {
    requested: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            log::info!("[Shutdown] Shutdown requested");
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// A worker still registered when the coordinator exits.
/// Its record, branch and workspace are picked up again on restart.
#[derive(Debug, Clone, PartialEq)]
pub struct KeptWorker {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub branch_name: String,
    /// Clean merge held for approval
    pub awaiting_approval: bool,
}

#[derive(Debug, Clone)]
pub struct RepositorySummary {
    pub repo_path: PathBuf,
    pub kept: Vec<KeptWorker>,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownSummary {
    pub repositories: Vec<RepositorySummary>,
}

impl ShutdownSummary {
    pub fn kept_workers(&self) -> usize {
        self.repositories.iter().map(|r| r.kept.len()).sum()
    }
}

fn kept_worker(worker: Worker) -> KeptWorker {
    KeptWorker {
        awaiting_approval: worker.pending_merge.is_some(),
        worker_id: worker.id,
        status: worker.status,
        branch_name: worker.branch_name,
    }
}

/// Non-terminal workers of one repository
pub fn summarize_repository(context: &RepositoryContext) -> RepositorySummary {
    let kept = context
        .registry()
        .list(&WorkerFilter {
            active_only: true,
            ..Default::default()
        })
        .into_iter()
        .map(kept_worker)
        .collect();

    RepositorySummary {
        repo_path: context.repo_path().to_path_buf(),
        kept,
    }
}

/// Mark shutdown and log what each repository leaves behind.
/// Nothing is torn down: workspaces and branches survive for the next run.
pub fn shut_down(state: &ShutdownState, contexts: &[Arc<RepositoryContext>]) -> ShutdownSummary {
    state.request_shutdown();

    let summary = ShutdownSummary {
        repositories: contexts.iter().map(|c| summarize_repository(c)).collect(),
    };

    for repo in &summary.repositories {
        log::info!(
            "[Shutdown] {:?}: keeping {} worker(s)",
            repo.repo_path,
            repo.kept.len()
        );
        for worker in &repo.kept {
            if worker.status == WorkerStatus::Merging && !worker.awaiting_approval {
                log::warn!(
                    "[Shutdown] Worker {} was mid-merge on {}",
                    worker.worker_id,
                    worker.branch_name
                );
            } else {
                log::info!(
                    "[Shutdown] Worker {} ({}) keeps {}",
                    worker.worker_id,
                    worker.status,
                    worker.branch_name
                );
            }
        }
    }

    log::info!(
        "[Shutdown] Closed {} repositories, {} worker(s) kept",
        summary.repositories.len(),
        summary.kept_workers()
    );
    summary
}

/// Register signal handlers for graceful shutdown
/// This sets up handlers for SIGINT (Ctrl+C), SIGTERM, and SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow::anyhow!("Failed to register signal handlers: {}", e))?;

    thread::spawn(move || {
        for signal in signals.forever() {
            log::info!("[Shutdown] Received signal {}", signal);
            state.request_shutdown();
        }
    });

    Ok(())
}

#[cfg(windows)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("[Shutdown] Received Ctrl+C");
        state.request_shutdown();
    })
    .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::fleet::test_support::init_repo;
    use crate::fleet::{HeartbeatRequest, SpawnRequest};

    #[test]
    fn test_clones_share_the_flag() {
        let state = ShutdownState::new();
        let other = state.clone();
        assert!(!other.is_shutdown_requested());

        state.request_shutdown();
        assert!(other.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_shut_down_keeps_active_workers() {
        let repo = init_repo();
        let ctx = Arc::new(
            RepositoryContext::open_with_config(repo.path(), FleetConfig::default()).unwrap(),
        );
        let spawn = |task: &str| {
            ctx.spawn_worker(SpawnRequest {
                task_id: task.to_string(),
                task_title: "t".to_string(),
                ..Default::default()
            })
            .unwrap()
        };
        let running = spawn("SD.3");
        let failed = spawn("SD.4");
        ctx.heartbeat(HeartbeatRequest {
            worker_id: running.worker_id.clone(),
            ..Default::default()
        })
        .unwrap();
        ctx.fail_worker(&failed.worker_id, "gave up").await.unwrap();

        let state = ShutdownState::new();
        let summary = shut_down(&state, &[ctx.clone()]);

        assert!(state.is_shutdown_requested());
        assert_eq!(summary.kept_workers(), 2);
        let kept = &summary.repositories[0].kept;
        let statuses: Vec<WorkerStatus> = kept.iter().map(|k| k.status).collect();
        assert!(statuses.contains(&WorkerStatus::Working));
        assert!(statuses.contains(&WorkerStatus::Error));
        assert!(kept.iter().all(|k| !k.awaiting_approval));

        // Nothing torn down
        assert!(std::path::Path::new(&running.workspace_path).exists());
    }
}
