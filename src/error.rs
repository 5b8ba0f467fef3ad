//! Error taxonomy for coordinator operations
//!
//! Merge conflicts are not errors: they come back as `MergeOutcome::Conflict`.

use crate::models::WorkerStatus;
use serde_json::{json, Value};
use thiserror::Error;

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Workspace or branch creation failed; no worker was registered
    #[error("Failed to provision workspace: {0}")]
    Provision(String),

    #[error("Worker capacity exceeded: {active} active, max {max_workers}")]
    CapacityExceeded { max_workers: usize, active: usize },

    #[error("Worker not found: {worker_id}")]
    NotFound { worker_id: String },

    #[error("Worker {worker_id} cannot go from {from} to {to}")]
    InvalidStateTransition {
        worker_id: String,
        from: WorkerStatus,
        to: WorkerStatus,
    },

    #[error("Worker {worker_id} has uncommitted changes in {} file(s): {}", files.len(), files.join(", "))]
    UncommittedChanges {
        worker_id: String,
        files: Vec<String>,
    },

    /// The dry run did not finish in time; the target branch was not touched
    #[error("Merge of worker {worker_id} timed out after {timeout_secs}s")]
    MergeTimeout { worker_id: String, timeout_secs: u64 },

    #[error("Workspace cleanup incomplete (workspace removed: {workspace_removed}, branch deleted: {branch_deleted}): {reason}")]
    Destroy {
        workspace_removed: bool,
        branch_deleted: bool,
        reason: String,
    },

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A request that is malformed on its own, before any state is consulted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FleetError {
    pub fn not_found(worker_id: &str) -> Self {
        FleetError::NotFound {
            worker_id: worker_id.to_string(),
        }
    }

    /// Stable machine-readable kind for the command surface
    pub fn code(&self) -> &'static str {
        match self {
            FleetError::Provision(_) => "provision_error",
            FleetError::CapacityExceeded { .. } => "capacity_exceeded",
            FleetError::NotFound { .. } => "not_found",
            FleetError::InvalidStateTransition { .. } => "invalid_state_transition",
            FleetError::UncommittedChanges { .. } => "uncommitted_changes",
            FleetError::MergeTimeout { .. } => "merge_timeout",
            FleetError::Destroy { .. } => "destroy_error",
            FleetError::Git(_) => "git_error",
            FleetError::Storage(_) => "storage_error",
            FleetError::Config(_) => "config_error",
            FleetError::InvalidArgument(_) => "invalid_argument",
        }
    }

    /// Structured fields so callers can decide between retry and escalation
    pub fn details(&self) -> Value {
        match self {
            FleetError::CapacityExceeded {
                max_workers,
                active,
            } => json!({ "maxWorkers": max_workers, "active": active }),
            FleetError::NotFound { worker_id } => json!({ "workerId": worker_id }),
            FleetError::InvalidStateTransition {
                worker_id,
                from,
                to,
            } => json!({ "workerId": worker_id, "from": from, "to": to }),
            FleetError::UncommittedChanges { worker_id, files } => {
                json!({ "workerId": worker_id, "files": files })
            }
            FleetError::MergeTimeout {
                worker_id,
                timeout_secs,
            } => json!({ "workerId": worker_id, "timeoutSecs": timeout_secs }),
            FleetError::Destroy {
                workspace_removed,
                branch_deleted,
                ..
            } => json!({ "workspaceRemoved": workspace_removed, "branchDeleted": branch_deleted }),
            FleetError::Provision(_)
            | FleetError::Git(_)
            | FleetError::Storage(_)
            | FleetError::Config(_)
            | FleetError::InvalidArgument(_) => Value::Null,
        }
    }
}
