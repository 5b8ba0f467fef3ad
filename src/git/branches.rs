//! Branch operations for GitManager
//!
//! Contains methods for creating branches at a ref, deleting them and
//! checking whether one branch has been merged into another

use git2::{Branch, BranchType, Error as GitError, ErrorCode, Oid};

use crate::git::types::BranchInfo;
use crate::git::GitManager;

impl GitManager {
    /// Create a new branch pointing at the tip of `from_branch`.
    /// Fails if a branch with that name already exists.
    pub fn create_branch_at(&self, name: &str, from_branch: &str) -> Result<BranchInfo, GitError> {
        let base = self.repo.find_branch(from_branch, BranchType::Local)?;
        let base_commit = base.get().peel_to_commit()?;

        let branch = self.repo.branch(name, &base_commit, false)?;

        Ok(self.branch_to_info(&branch)?)
    }

    /// Check whether a local branch exists
    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Get the commit a local branch points at
    pub fn branch_tip(&self, name: &str) -> Result<Oid, GitError> {
        let branch = self.repo.find_branch(name, BranchType::Local)?;
        Ok(branch.get().peel_to_commit()?.id())
    }

    /// Delete a branch
    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        let mut branch = self.repo.find_branch(name, BranchType::Local)?;
        branch.delete()?;
        Ok(())
    }

    /// Check whether every commit of `branch` is reachable from `into`
    pub fn is_branch_merged(&self, branch: &str, into: &str) -> Result<bool, GitError> {
        let branch_tip = self.branch_tip(branch)?;
        let into_tip = self.branch_tip(into)?;

        if branch_tip == into_tip {
            return Ok(true);
        }
        self.repo.graph_descendant_of(into_tip, branch_tip)
    }

    /// Name of the branch checked out in this repository's working tree
    pub fn current_branch_name(&self) -> Result<Option<String>, GitError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e),
        };

        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(|s| s.to_string()))
    }

    /// Whether `name` is the branch checked out in this working tree
    pub(crate) fn is_checked_out_here(&self, name: &str) -> Result<bool, GitError> {
        if self.repo.is_bare() {
            return Ok(false);
        }
        Ok(self.current_branch_name()?.as_deref() == Some(name))
    }

    /// Convert a Branch to BranchInfo
    pub(crate) fn branch_to_info(&self, branch: &Branch) -> Result<BranchInfo, GitError> {
        let name = branch.name()?.unwrap_or("").to_string();
        let is_head = branch.is_head();

        let commit = branch.get().peel_to_commit()?;
        let commit_id = commit.id().to_string();

        Ok(BranchInfo {
            name,
            is_head,
            commit_id,
        })
    }
}
