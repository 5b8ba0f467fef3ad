//! Git data types and structures
//!
//! Contains all shared types used across git operations

use crate::models::FileConflict;
use git2::Oid;
use serde::{Deserialize, Serialize};

/// Represents a git branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub is_head: bool,
    pub commit_id: String,
}

/// Represents a git worktree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: String,
    pub branch: Option<String>,
    pub is_locked: bool,
}

/// Represents a file status in git
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub status: String,
}

/// Outcome of an in-memory merge of a source branch into a target branch.
/// Computing it never touches refs, the index or any working tree.
#[derive(Debug, Clone)]
pub struct DryRunResult {
    pub source_tip: Oid,
    pub target_tip: Oid,
    /// Target already contains every source commit
    pub up_to_date: bool,
    /// Target is an ancestor of source
    pub fast_forward: bool,
    /// Ordered by path
    pub conflicts: Vec<FileConflict>,
}

impl DryRunResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Outcome of a real integration
#[derive(Debug, Clone)]
pub struct IntegrationResult {
    /// New target tip, or None when there was nothing to integrate
    pub commit_id: Option<Oid>,
    /// Non-empty only when a rebase replay step conflicted; target untouched
    pub conflicts: Vec<FileConflict>,
}
