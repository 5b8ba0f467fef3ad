//! Merge and conflict handling for GitManager
//!
//! Contains the in-memory dry run, the three integration strategies and the
//! compare-and-swap ref update used to publish a new target tip

use git2::{build::CheckoutBuilder, Commit, Error as GitError, Index, Oid, Sort};
use std::collections::BTreeMap;

use crate::git::types::{DryRunResult, IntegrationResult};
use crate::git::GitManager;
use crate::models::{ConflictType, FileConflict, MergeStrategy};

impl GitManager {
    /// Three-way merge of `source` into `target` computed entirely in memory.
    /// Refs, the index and every working tree are left as they were.
    pub fn dry_run_merge(&self, source: &str, target: &str) -> Result<DryRunResult, GitError> {
        let source_tip = self.branch_tip(source)?;
        let target_tip = self.branch_tip(target)?;

        let mut result = DryRunResult {
            source_tip,
            target_tip,
            up_to_date: false,
            fast_forward: false,
            conflicts: Vec::new(),
        };

        if source_tip == target_tip || self.repo.graph_descendant_of(target_tip, source_tip)? {
            result.up_to_date = true;
            return Ok(result);
        }
        if self.repo.graph_descendant_of(source_tip, target_tip)? {
            result.fast_forward = true;
            return Ok(result);
        }

        let ours = self.repo.find_commit(target_tip)?;
        let theirs = self.repo.find_commit(source_tip)?;
        let index = self.repo.merge_commits(&ours, &theirs, None)?;

        if index.has_conflicts() {
            result.conflicts = collect_conflicts(&index)?;
        }

        log::debug!(
            "[GitManager] Dry run {} -> {}: {} conflict(s)",
            source,
            target,
            result.conflicts.len()
        );

        Ok(result)
    }

    /// Integrate `source` into `target` with the given strategy.
    ///
    /// Fails without touching anything if the target tip is no longer
    /// `expected_target`. A rebase replay step that conflicts comes back as
    /// conflicts with the target untouched.
    pub fn integrate(
        &self,
        source: &str,
        target: &str,
        strategy: MergeStrategy,
        message: &str,
        expected_target: Oid,
    ) -> Result<IntegrationResult, GitError> {
        let dry_run = self.dry_run_merge(source, target)?;
        if dry_run.target_tip != expected_target {
            return Err(GitError::from_str(&format!(
                "Target branch '{}' moved since the dry run ({} != {})",
                target, dry_run.target_tip, expected_target
            )));
        }

        if dry_run.up_to_date {
            log::info!("[GitManager] {} already contains {}", target, source);
            return Ok(IntegrationResult {
                commit_id: None,
                conflicts: Vec::new(),
            });
        }
        if !dry_run.conflicts.is_empty() {
            return Ok(IntegrationResult {
                commit_id: None,
                conflicts: dry_run.conflicts,
            });
        }

        let outcome = match strategy {
            MergeStrategy::Squash => self.squash_commit(&dry_run, message)?,
            MergeStrategy::Merge => self.merge_commit(&dry_run, message)?,
            MergeStrategy::Rebase => self.replay_commits(&dry_run)?,
        };

        if let Some(new_tip) = outcome.commit_id {
            self.advance_branch(target, dry_run.target_tip, new_tip)?;
            log::info!(
                "[GitManager] Integrated {} into {} ({}) at {}",
                source,
                target,
                strategy,
                new_tip
            );
        }

        Ok(outcome)
    }

    /// Move `branch` from `old_tip` to `new_tip`, failing if it no longer
    /// points at `old_tip`. When the branch is checked out in the main
    /// working tree, the tree is updated with a safe checkout first and put
    /// back if the ref update loses the race.
    pub fn advance_branch(&self, branch: &str, old_tip: Oid, new_tip: Oid) -> Result<(), GitError> {
        let ref_name = format!("refs/heads/{}", branch);
        let current = self.repo.find_reference(&ref_name)?.target();
        if current != Some(old_tip) {
            return Err(GitError::from_str(&format!(
                "Branch '{}' moved ({:?} != {})",
                branch, current, old_tip
            )));
        }

        let checked_out = self.is_checked_out_here(branch)?;
        if checked_out {
            let commit = self.repo.find_commit(new_tip)?;
            let mut checkout = CheckoutBuilder::new();
            checkout.safe();
            self.repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
        }

        if let Err(e) = self.repo.reference_matching(
            &ref_name,
            new_tip,
            true,
            old_tip,
            &format!("fleet: advance {} to {}", branch, new_tip),
        ) {
            if checked_out {
                if let Err(restore) = self.restore_checkout(old_tip, new_tip) {
                    log::warn!(
                        "[GitManager] Could not restore checkout of {} after failed update: {}",
                        branch,
                        restore
                    );
                }
            }
            return Err(e);
        }

        Ok(())
    }

    /// Force the paths that differ between `from` and `to` back to `to`.
    /// Only those paths were touched by the safe checkout, so nothing else
    /// in the working tree is overwritten.
    pub(crate) fn restore_checkout(&self, to: Oid, from: Oid) -> Result<(), GitError> {
        let to_tree = self.repo.find_commit(to)?.tree()?;
        let from_tree = self.repo.find_commit(from)?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&to_tree), Some(&from_tree), None)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        let mut any = false;
        for delta in diff.deltas() {
            for path in [delta.old_file().path(), delta.new_file().path()].into_iter().flatten() {
                checkout.path(path);
                any = true;
            }
        }
        if !any {
            return Ok(());
        }

        self.repo.checkout_tree(to_tree.as_object(), Some(&mut checkout))
    }

    /// One commit on top of the target holding the merged tree
    fn squash_commit(&self, dry_run: &DryRunResult, message: &str) -> Result<IntegrationResult, GitError> {
        let target = self.repo.find_commit(dry_run.target_tip)?;
        let tree_id = self.merged_tree(dry_run)?;

        if tree_id == target.tree_id() {
            return Ok(IntegrationResult {
                commit_id: None,
                conflicts: Vec::new(),
            });
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let commit_id = self.repo.commit(None, &sig, &sig, message, &tree, &[&target])?;

        Ok(IntegrationResult {
            commit_id: Some(commit_id),
            conflicts: Vec::new(),
        })
    }

    /// Fast-forward when possible, otherwise a two-parent merge commit
    fn merge_commit(&self, dry_run: &DryRunResult, message: &str) -> Result<IntegrationResult, GitError> {
        if dry_run.fast_forward {
            return Ok(IntegrationResult {
                commit_id: Some(dry_run.source_tip),
                conflicts: Vec::new(),
            });
        }

        let target = self.repo.find_commit(dry_run.target_tip)?;
        let source = self.repo.find_commit(dry_run.source_tip)?;
        let tree = self.repo.find_tree(self.merged_tree(dry_run)?)?;
        let sig = self.signature()?;
        let commit_id = self
            .repo
            .commit(None, &sig, &sig, message, &tree, &[&target, &source])?;

        Ok(IntegrationResult {
            commit_id: Some(commit_id),
            conflicts: Vec::new(),
        })
    }

    /// Replay each source commit missing from the target onto the target tip
    fn replay_commits(&self, dry_run: &DryRunResult) -> Result<IntegrationResult, GitError> {
        if dry_run.fast_forward {
            return Ok(IntegrationResult {
                commit_id: Some(dry_run.source_tip),
                conflicts: Vec::new(),
            });
        }

        let mut walk = self.repo.revwalk()?;
        walk.push(dry_run.source_tip)?;
        walk.hide(dry_run.target_tip)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        let sig = self.signature()?;
        let mut onto: Commit = self.repo.find_commit(dry_run.target_tip)?;

        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            let mainline = if commit.parent_count() > 1 { 1 } else { 0 };

            let mut index = self.repo.cherrypick_commit(&commit, &onto, mainline, None)?;
            if index.has_conflicts() {
                log::info!("[GitManager] Replay of {} conflicted", commit.id());
                return Ok(IntegrationResult {
                    commit_id: None,
                    conflicts: collect_conflicts(&index)?,
                });
            }

            let tree_id = index.write_tree_to(&self.repo)?;
            if tree_id == onto.tree_id() {
                continue;
            }

            let tree = self.repo.find_tree(tree_id)?;
            let replayed = self.repo.commit(
                None,
                &commit.author(),
                &sig,
                commit.message().unwrap_or(""),
                &tree,
                &[&onto],
            )?;
            onto = self.repo.find_commit(replayed)?;
        }

        let commit_id = if onto.id() == dry_run.target_tip {
            None
        } else {
            Some(onto.id())
        };

        Ok(IntegrationResult {
            commit_id,
            conflicts: Vec::new(),
        })
    }

    fn merged_tree(&self, dry_run: &DryRunResult) -> Result<Oid, GitError> {
        if dry_run.fast_forward {
            return Ok(self.repo.find_commit(dry_run.source_tip)?.tree_id());
        }

        let ours = self.repo.find_commit(dry_run.target_tip)?;
        let theirs = self.repo.find_commit(dry_run.source_tip)?;
        let mut index = self.repo.merge_commits(&ours, &theirs, None)?;
        if index.has_conflicts() {
            return Err(GitError::from_str("Merge produced conflicts after a clean dry run"));
        }
        index.write_tree_to(&self.repo)
    }
}

/// File-level conflicts of a merge index, one per path, ordered by path.
/// "Ours" is the target side, "theirs" the worker side.
fn collect_conflicts(index: &Index) -> Result<Vec<FileConflict>, GitError> {
    let mut by_path: BTreeMap<String, ConflictType> = BTreeMap::new();

    for conflict in index.conflicts()? {
        let conflict = conflict?;

        let path = conflict
            .their
            .as_ref()
            .or(conflict.our.as_ref())
            .or(conflict.ancestor.as_ref())
            .map(|entry| String::from_utf8_lossy(&entry.path).to_string());
        let Some(path) = path else {
            continue;
        };

        let conflict_type = match (
            conflict.ancestor.is_some(),
            conflict.our.is_some(),
            conflict.their.is_some(),
        ) {
            (false, true, true) => ConflictType::AddAdd,
            (true, false, true) => ConflictType::DeleteModify,
            (true, true, false) => ConflictType::ModifyDelete,
            _ => ConflictType::Content,
        };

        by_path.entry(path).or_insert(conflict_type);
    }

    Ok(by_path
        .into_iter()
        .map(|(file, conflict_type)| FileConflict {
            file,
            conflict_type,
        })
        .collect())
}
