// Data models shared by the coordinator core and the command surface

pub mod state_machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Working,
    Paused,
    Merging,
    Merged,
    Error,
    Stopped,
}

impl WorkerStatus {
    /// Returns all worker statuses
    pub fn all() -> &'static [WorkerStatus] {
        &[
            WorkerStatus::Pending,
            WorkerStatus::Working,
            WorkerStatus::Paused,
            WorkerStatus::Merging,
            WorkerStatus::Merged,
            WorkerStatus::Error,
            WorkerStatus::Stopped,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Pending => "pending",
            WorkerStatus::Working => "working",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Merging => "merging",
            WorkerStatus::Merged => "merged",
            WorkerStatus::Error => "error",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                format!(
                    "Unknown worker status: '{}'. Expected one of: pending, working, paused, merging, merged, error, stopped",
                    s
                )
            })
    }
}

/// How a worker branch is folded into the target branch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Collapse all worker commits into one commit on the target
    Squash,
    /// Preserve history (fast-forward or two-parent merge commit)
    Merge,
    /// Replay worker commits onto the target tip
    Rebase,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Squash => "squash",
            MergeStrategy::Merge => "merge",
            MergeStrategy::Rebase => "rebase",
        }
    }
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Squash
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "squash" => Ok(MergeStrategy::Squash),
            "merge" => Ok(MergeStrategy::Merge),
            "rebase" => Ok(MergeStrategy::Rebase),
            _ => Err(format!(
                "Unknown merge strategy: '{}'. Expected one of: squash, merge, rebase",
                s
            )),
        }
    }
}

/// A follow-up task handed to a worker after a successful merge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NextTask {
    pub task_id: String,
    pub task_title: String,
}

/// A clean merge held until an external approval call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingMerge {
    pub target_branch: String,
    pub strategy: MergeStrategy,
    pub commit_message: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// One assigned unit of concurrent work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub task_id: String,
    pub task_title: String,
    pub branch_name: String,
    pub workspace_path: String,
    /// Branch the workspace was forked from
    pub target_branch: String,
    pub status: WorkerStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub heartbeat_at: DateTime<Utc>,
    pub next_task_id: Option<String>,
    pub next_task_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Status restored when a merge attempt does not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_status: Option<WorkerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_merge: Option<PendingMerge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Worker {
    pub fn new(
        id: String,
        task_id: String,
        task_title: String,
        branch_name: String,
        workspace_path: String,
        target_branch: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            task_title,
            branch_name,
            workspace_path,
            target_branch,
            status: WorkerStatus::Pending,
            progress: 0,
            message: None,
            heartbeat_at: now,
            next_task_id: None,
            next_task_title: None,
            created_at: now,
            updated_at: now,
            resume_status: None,
            pending_merge: None,
            error_message: None,
        }
    }

    /// The pre-assigned follow-up task, if any
    pub fn next_task(&self) -> Option<NextTask> {
        self.next_task_id.as_ref().map(|task_id| NextTask {
            task_id: task_id.clone(),
            task_title: self
                .next_task_title
                .clone()
                .unwrap_or_else(|| task_id.clone()),
        })
    }

    pub fn is_active(&self) -> bool {
        state_machine::is_active_state(self.status)
    }
}

/// Filter for registry listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerFilter {
    pub status: Option<WorkerStatus>,
    #[serde(default)]
    pub active_only: bool,
    pub task_id: Option<String>,
}

impl WorkerFilter {
    pub fn matches(&self, worker: &Worker) -> bool {
        if let Some(status) = self.status {
            if worker.status != status {
                return false;
            }
        }
        if self.active_only && !worker.is_active() {
            return false;
        }
        if let Some(ref task_id) = self.task_id {
            if &worker.task_id != task_id {
                return false;
            }
        }
        true
    }
}

/// Kind of file-level conflict found by a dry-run integration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    /// Both sides changed overlapping lines of the file
    Content,
    /// Both sides added a file at the same path
    AddAdd,
    /// Target deleted the file, worker modified it
    DeleteModify,
    /// Target modified the file, worker deleted it
    ModifyDelete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileConflict {
    pub file: String,
    pub conflict_type: ConflictType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Dry run found no overlapping hunks
    Clean,
    Conflict,
    PendingApproval,
    Merged,
}

/// Result of one integration try; not persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MergeAttempt {
    pub worker_id: String,
    pub target_branch: String,
    pub strategy: MergeStrategy,
    pub outcome: MergeOutcome,
    pub conflicts: Vec<FileConflict>,
    /// New target tip when merged (None if already up to date)
    pub commit_id: Option<String>,
    pub next_task: Option<NextTask>,
    pub workspace_removed: bool,
}

impl MergeAttempt {
    pub fn new(worker_id: &str, target_branch: &str, strategy: MergeStrategy) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            target_branch: target_branch.to_string(),
            strategy,
            outcome: MergeOutcome::Clean,
            conflicts: Vec::new(),
            commit_id: None,
            next_task: None,
            workspace_removed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_worker() -> Worker {
        Worker::new(
            "w-1".to_string(),
            "SD.3".to_string(),
            "Add login form".to_string(),
            "fleet/sd-3-abc123".to_string(),
            "/tmp/repo/.fleet/worktrees/fleet-sd-3-abc123".to_string(),
            "main".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_worker_serializes_camel_case() {
        let worker = sample_worker();
        let json = serde_json::to_value(&worker).unwrap();
        assert_eq!(json["taskId"], "SD.3");
        assert_eq!(json["status"], "pending");
        assert!(json.get("resumeStatus").is_none());
        assert!(json["nextTaskId"].is_null());
    }

    #[test]
    fn test_next_task_defaults_title_to_id() {
        let mut worker = sample_worker();
        assert!(worker.next_task().is_none());

        worker.next_task_id = Some("SD.4".to_string());
        let next = worker.next_task().unwrap();
        assert_eq!(next.task_id, "SD.4");
        assert_eq!(next.task_title, "SD.4");
    }

    #[test]
    fn test_conflict_type_kebab_case() {
        let json = serde_json::to_string(&ConflictType::DeleteModify).unwrap();
        assert_eq!(json, "\"delete-modify\"");
        let json = serde_json::to_string(&ConflictType::AddAdd).unwrap();
        assert_eq!(json, "\"add-add\"");
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Paused".parse::<WorkerStatus>().unwrap(), WorkerStatus::Paused);
        assert!("sleeping".parse::<WorkerStatus>().is_err());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("REBASE".parse::<MergeStrategy>().unwrap(), MergeStrategy::Rebase);
        assert_eq!(MergeStrategy::default(), MergeStrategy::Squash);
        assert!("octopus".parse::<MergeStrategy>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let mut worker = sample_worker();
        let filter = WorkerFilter {
            active_only: true,
            ..Default::default()
        };
        assert!(filter.matches(&worker));

        worker.status = WorkerStatus::Merged;
        assert!(!filter.matches(&worker));

        let filter = WorkerFilter {
            status: Some(WorkerStatus::Merged),
            task_id: Some("SD.3".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&worker));
    }
}
