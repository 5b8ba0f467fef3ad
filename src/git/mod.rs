//! Git operations using git2-rs
//!
//! This module provides git functionality organized into focused submodules:
//! - `manager` - Core GitManager struct and basic operations
//! - `branches` - Branch operations (create at a ref, delete, merged checks)
//! - `worktrees` - Worktree management (add, remove, prune)
//! - `merge` - Dry-run conflict detection and squash/merge/rebase integration
//! - `status` - Working tree status for uncommitted change detection
//! - `types` - Shared data structures

mod branches;
mod manager;
mod merge;
mod status;
mod types;
mod worktrees;

// Re-export the main GitManager struct
pub use manager::GitManager;

pub use types::{BranchInfo, DryRunResult, FileStatus, IntegrationResult, WorktreeInfo};
pub use worktrees::worktree_name;
