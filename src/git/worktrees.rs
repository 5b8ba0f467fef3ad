//! Worktree management for GitManager
//!
//! Contains methods for creating, removing and pruning worktrees

use git2::{BranchType, Error as GitError, Repository, Worktree, WorktreeAddOptions, WorktreePruneOptions};
use std::path::Path;

use crate::git::types::WorktreeInfo;
use crate::git::GitManager;

/// Name under `.git/worktrees/` for a branch's worktree.
/// Branch names like "fleet/sd-3-ab12cd" would otherwise nest directories.
pub fn worktree_name(branch: &str) -> String {
    branch.replace('/', "-")
}

impl GitManager {
    /// Create a worktree checked out on an existing local branch
    pub fn create_worktree(&self, branch: &str, path: &Path) -> Result<WorktreeInfo, GitError> {
        let branch_ref = self.repo.find_branch(branch, BranchType::Local)?;

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch_ref.get()));

        let worktree = self
            .repo
            .worktree(&worktree_name(branch), path, Some(&opts))?;

        Ok(self.worktree_to_info(&worktree)?)
    }

    /// List all worktrees
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let worktrees = self.repo.worktrees()?;

        let mut result = Vec::new();
        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                result.push(self.worktree_to_info(&worktree)?);
            }
        }

        Ok(result)
    }

    /// Remove the worktree registered for `branch` (or, failing that, at `path`),
    /// deleting its working directory. Returns false if no such worktree is registered.
    pub fn remove_worktree(&self, branch: &str, path: &Path) -> Result<bool, GitError> {
        let worktree = match self.find_worktree_for(branch, path)? {
            Some(worktree) => worktree,
            None => return Ok(false),
        };

        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).locked(true).working_tree(true);
        worktree.prune(Some(&mut opts))?;

        Ok(true)
    }

    /// Prune orphaned worktrees (where the physical directory no longer exists)
    /// This cleans up stale entries in .git/worktrees/
    pub fn prune_orphaned_worktrees(&self) -> Result<u32, GitError> {
        let worktrees = self.repo.worktrees()?;
        let mut pruned_count = 0;

        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                let worktree_path = worktree.path();
                if !worktree_path.exists() {
                    log::info!(
                        "[Git] Pruning orphaned worktree '{}' (path {:?} no longer exists)",
                        name,
                        worktree_path
                    );
                    if let Err(e) = worktree.prune(None) {
                        log::warn!("[Git] Failed to prune worktree '{}': {}", name, e);
                    } else {
                        pruned_count += 1;
                    }
                }
            }
        }

        Ok(pruned_count)
    }

    fn find_worktree_for(&self, branch: &str, path: &Path) -> Result<Option<Worktree>, GitError> {
        if let Ok(worktree) = self.repo.find_worktree(&worktree_name(branch)) {
            return Ok(Some(worktree));
        }

        let wanted = path.to_string_lossy();
        let wanted = wanted.trim_end_matches('/');
        for name in self.repo.worktrees()?.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                let worktree_path = worktree.path().to_string_lossy().to_string();
                if worktree_path.trim_end_matches('/') == wanted {
                    return Ok(Some(worktree));
                }
            }
        }

        Ok(None)
    }

    /// Convert a Worktree to WorktreeInfo
    pub(crate) fn worktree_to_info(&self, worktree: &Worktree) -> Result<WorktreeInfo, GitError> {
        let name = worktree.name().unwrap_or("").to_string();
        let path = worktree.path().to_string_lossy().to_string();
        let is_locked = worktree
            .is_locked()
            .map(|status| !matches!(status, git2::WorktreeLockStatus::Unlocked))
            .unwrap_or(false);

        let branch = Repository::open(worktree.path())
            .ok()
            .and_then(|wt_repo| {
                let head = wt_repo.head().ok()?;
                if head.is_branch() {
                    head.shorthand().map(|s| s.to_string())
                } else {
                    None
                }
            });

        Ok(WorktreeInfo {
            name,
            path,
            branch,
            is_locked,
        })
    }
}
