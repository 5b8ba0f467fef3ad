//! Workspace Provisioner
//!
//! Creates and destroys the isolated workspace of a worker: a branch forked
//! from the target branch tip plus a linked worktree checked out on it.

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::file_storage::{ensure_dir, index};
use crate::git::GitManager;
use crate::utils::{rand_string, shell_quote};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Length of the random suffix that keeps branch names unique
const SUFFIX_LEN: usize = 6;

/// A freshly created workspace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedWorkspace {
    pub branch_name: String,
    pub workspace_path: String,
    /// Ready-to-run launch command for the worker process
    pub start_command: String,
}

/// What a teardown actually removed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DestroyOutcome {
    pub workspace_removed: bool,
    pub branch_deleted: bool,
}

pub struct WorkspaceProvisioner {
    repo_path: PathBuf,
    worktree_dir: PathBuf,
    branch_prefix: String,
    start_command: String,
}

impl WorkspaceProvisioner {
    pub fn new(repo_path: &Path, config: &FleetConfig) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            worktree_dir: config.resolve_worktree_dir(repo_path),
            branch_prefix: config.branch_prefix.clone(),
            start_command: config.start_command.clone(),
        }
    }

    /// Directory workspaces are created in
    pub fn worktree_dir(&self) -> &Path {
        &self.worktree_dir
    }

    /// Create a workspace for a worker with a random branch suffix
    pub fn create(
        &self,
        worker_id: &str,
        task_id: &str,
        task_title: &str,
        target_branch: &str,
    ) -> FleetResult<ProvisionedWorkspace> {
        self.create_with_suffix(
            worker_id,
            task_id,
            task_title,
            target_branch,
            &rand_string(SUFFIX_LEN),
        )
    }

    /// Create a workspace using the given branch suffix.
    ///
    /// Fails with `Provision` and leaves nothing behind if the path exists,
    /// the name was ever issued before, or git refuses.
    pub fn create_with_suffix(
        &self,
        worker_id: &str,
        task_id: &str,
        task_title: &str,
        target_branch: &str,
        suffix: &str,
    ) -> FleetResult<ProvisionedWorkspace> {
        let branch_name = format!(
            "{}{}-{}",
            self.branch_prefix,
            sanitize_branch_name(task_id),
            sanitize_branch_name(suffix)
        );
        let workspace_path = self.worktree_dir.join(sanitize_path_component(&branch_name));
        let workspace_str = workspace_path.to_string_lossy().to_string();

        let git_manager = GitManager::new(&self.repo_path)
            .map_err(|e| FleetError::Provision(format!("Failed to open git repository: {}", e)))?;

        if !git_manager.branch_exists(target_branch) {
            return Err(FleetError::Provision(format!(
                "Target branch '{}' does not exist",
                target_branch
            )));
        }
        if workspace_path.exists() {
            return Err(FleetError::Provision(format!(
                "Workspace path {:?} already exists",
                workspace_path
            )));
        }
        if git_manager.branch_exists(&branch_name) {
            return Err(FleetError::Provision(format!(
                "Branch '{}' already exists",
                branch_name
            )));
        }
        let issued = index::is_issued(&self.repo_path, &branch_name, &workspace_str)
            .map_err(FleetError::Storage)?;
        if issued {
            return Err(FleetError::Provision(format!(
                "Branch '{}' or workspace {:?} was issued before",
                branch_name, workspace_path
            )));
        }

        let start_command =
            self.render_start_command(&workspace_str, &branch_name, worker_id, task_id, task_title)?;

        ensure_dir(&self.worktree_dir).map_err(FleetError::Provision)?;

        git_manager
            .create_branch_at(&branch_name, target_branch)
            .map_err(|e| FleetError::Provision(format!("Failed to create branch: {}", e)))?;

        if let Err(e) = git_manager.create_worktree(&branch_name, &workspace_path) {
            self.rollback(&git_manager, &branch_name, &workspace_path);
            return Err(FleetError::Provision(format!("Failed to create worktree: {}", e)));
        }

        let entry = index::IssuedNameEntry {
            worker_id: worker_id.to_string(),
            branch_name: branch_name.clone(),
            workspace_path: workspace_str.clone(),
            issued_at: Utc::now(),
        };
        if let Err(e) = index::record_issued(&self.repo_path, entry) {
            self.rollback(&git_manager, &branch_name, &workspace_path);
            return Err(FleetError::Provision(format!("Failed to record issued names: {}", e)));
        }

        log::info!(
            "[Provisioner] Created workspace for task {} at {:?} on branch {}",
            task_id,
            workspace_path,
            branch_name
        );

        Ok(ProvisionedWorkspace {
            branch_name,
            workspace_path: workspace_str,
            start_command,
        })
    }

    /// Tear down a workspace. An absent workspace counts as removed.
    ///
    /// The branch is deleted only when `delete_branch` is set and the branch
    /// is merged into `target_branch` or `force` is set.
    pub fn destroy(
        &self,
        workspace_path: &Path,
        branch_name: &str,
        target_branch: &str,
        delete_branch: bool,
        force: bool,
    ) -> FleetResult<DestroyOutcome> {
        let git_manager = GitManager::new(&self.repo_path).map_err(|e| FleetError::Destroy {
            workspace_removed: false,
            branch_deleted: false,
            reason: format!("Failed to open git repository: {}", e),
        })?;

        let mut outcome = DestroyOutcome::default();
        let mut failures = Vec::new();

        match git_manager.remove_worktree(branch_name, workspace_path) {
            Ok(_) => {}
            Err(e) => {
                log::warn!("[Provisioner] git refused to remove worktree {:?}: {}", workspace_path, e);
                if let Err(e) = git_manager.prune_orphaned_worktrees() {
                    log::debug!("[Provisioner] Prune after failed removal: {}", e);
                }
            }
        }
        if workspace_path.exists() {
            if let Err(e) = std::fs::remove_dir_all(workspace_path) {
                failures.push(format!("Failed to remove workspace {:?}: {}", workspace_path, e));
            }
        }
        outcome.workspace_removed = !workspace_path.exists();

        if delete_branch {
            if !git_manager.branch_exists(branch_name) {
                outcome.branch_deleted = true;
            } else {
                let merged = force
                    || git_manager
                        .is_branch_merged(branch_name, target_branch)
                        .unwrap_or(false);
                if merged {
                    match git_manager.delete_branch(branch_name) {
                        Ok(()) => outcome.branch_deleted = true,
                        Err(e) => failures.push(format!("Failed to delete branch {}: {}", branch_name, e)),
                    }
                } else {
                    log::info!(
                        "[Provisioner] Keeping branch {}: not merged into {}",
                        branch_name,
                        target_branch
                    );
                }
            }
        }

        if !failures.is_empty() {
            return Err(FleetError::Destroy {
                workspace_removed: outcome.workspace_removed,
                branch_deleted: outcome.branch_deleted,
                reason: failures.join("; "),
            });
        }

        log::info!(
            "[Provisioner] Destroyed workspace {:?} (branch {} deleted: {})",
            workspace_path,
            branch_name,
            outcome.branch_deleted
        );

        Ok(outcome)
    }

    /// Drop worktree registrations whose directories no longer exist
    pub fn prune_orphans(&self) -> u32 {
        let pruned = GitManager::new(&self.repo_path)
            .and_then(|git_manager| git_manager.prune_orphaned_worktrees());
        match pruned {
            Ok(count) => count,
            Err(e) => {
                log::warn!("[Provisioner] Failed to prune orphaned worktrees: {}", e);
                0
            }
        }
    }

    /// Render the launch command template; every value is shell-quoted
    pub fn render_start_command(
        &self,
        workspace_path: &str,
        branch_name: &str,
        worker_id: &str,
        task_id: &str,
        task_title: &str,
    ) -> FleetResult<String> {
        let mut context = tera::Context::new();
        context.insert("workspace_path", &shell_quote(workspace_path));
        context.insert("branch_name", &shell_quote(branch_name));
        context.insert("worker_id", &shell_quote(worker_id));
        context.insert("task_id", &shell_quote(task_id));
        context.insert("task_title", &shell_quote(task_title));

        tera::Tera::one_off(&self.start_command, &context, false)
            .map_err(|e| FleetError::Provision(format!("Invalid start command template: {}", e)))
    }

    fn rollback(&self, git_manager: &GitManager, branch_name: &str, workspace_path: &Path) {
        if let Err(e) = git_manager.remove_worktree(branch_name, workspace_path) {
            log::warn!("[Provisioner] Rollback could not remove worktree: {}", e);
        }
        if workspace_path.exists() {
            if let Err(e) = std::fs::remove_dir_all(workspace_path) {
                log::warn!("[Provisioner] Rollback could not remove {:?}: {}", workspace_path, e);
            }
        }
        if let Err(e) = git_manager.delete_branch(branch_name) {
            log::warn!("[Provisioner] Rollback could not delete branch {}: {}", branch_name, e);
        }
    }
}

/// Sanitize a string for use in a branch name
fn sanitize_branch_name(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    let collapsed = mapped
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if collapsed.is_empty() {
        "task".to_string()
    } else {
        collapsed
    }
}

/// Sanitize a string for use as a path component
fn sanitize_path_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
}
