//! Worker command routing
//!
//! Handles: spawn_worker, list_workers, get_worker_status, pause_worker,
//! resume_worker, heartbeat, assign_next_task, abort_worker, fail_worker,
//! merge_worker, worker_complete, approve_merge, reject_merge, stop_worker,
//! list_dead_workers

use crate::fleet::{HeartbeatRequest, MergeRequest, SpawnRequest};
use crate::models::{MergeStrategy, WorkerStatus};
use serde_json::Value;

use super::{
    get_arg, get_opt_arg, resolve_context, resolve_worker_id, route_async, route_sync,
    CommandResult, ServerAppState,
};

/// Route worker-related commands
pub async fn route_worker_command(cmd: &str, args: Value, state: &ServerAppState) -> CommandResult {
    let ctx = resolve_context(&args, state)?;

    match cmd {
        "spawn_worker" => {
            let request = SpawnRequest {
                task_id: get_arg(&args, "taskId")?,
                task_title: get_arg(&args, "taskTitle")?,
                next_task_id: get_opt_arg(&args, "nextTaskId")?,
                next_task_title: get_opt_arg(&args, "nextTaskTitle")?,
            };
            route_sync!(ctx.spawn_worker(request))
        }

        "list_workers" => {
            let status: Option<WorkerStatus> = get_opt_arg(&args, "status")?;
            super::to_value(ctx.list_workers(status))
        }

        "get_worker_status" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            route_sync!(ctx.get_worker_status(&worker_id))
        }

        "pause_worker" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            route_sync!(ctx.pause_worker(&worker_id))
        }

        "resume_worker" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            route_sync!(ctx.resume_worker(&worker_id))
        }

        "heartbeat" => {
            let request = HeartbeatRequest {
                worker_id: resolve_worker_id(&args, &ctx)?,
                message: get_opt_arg(&args, "message")?,
                progress: get_opt_arg(&args, "progress")?,
                timestamp: get_opt_arg(&args, "timestamp")?,
            };
            route_sync!(ctx.heartbeat(request))
        }

        "assign_next_task" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            let task_id: String = get_arg(&args, "taskId")?;
            let task_title: String = get_arg(&args, "taskTitle")?;
            route_sync!(ctx.assign_next_task(&worker_id, &task_id, &task_title))
        }

        "abort_worker" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            route_sync!(ctx.abort_worker(&worker_id))
        }

        "fail_worker" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            let reason: String = get_arg(&args, "reason")?;
            route_async!(ctx.fail_worker(&worker_id, &reason))
        }

        "merge_worker" => {
            let mut request = MergeRequest::new(&resolve_worker_id(&args, &ctx)?);
            request.auto_merge = get_opt_arg(&args, "autoMerge")?.unwrap_or(true);
            request.commit_message = get_opt_arg(&args, "commitMessage")?;
            request.strategy = get_opt_arg::<MergeStrategy>(&args, "strategy")?;
            request.target_branch = get_opt_arg(&args, "targetBranch")?;
            route_async!(ctx.merge_worker(request))
        }

        "worker_complete" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            let summary: Option<String> = get_opt_arg(&args, "summary")?;
            route_async!(ctx.worker_complete(&worker_id, summary))
        }

        "approve_merge" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            route_async!(ctx.approve_merge(&worker_id))
        }

        "reject_merge" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            route_async!(ctx.reject_merge(&worker_id))
        }

        "stop_worker" => {
            let worker_id = resolve_worker_id(&args, &ctx)?;
            let force = get_opt_arg(&args, "force")?.unwrap_or(false);
            let delete_branch = get_opt_arg(&args, "deleteBranch")?.unwrap_or(false);
            route_async!(ctx.stop_worker(&worker_id, force, delete_branch))
        }

        "list_dead_workers" => {
            let threshold_ms: Option<u64> = get_opt_arg(&args, "thresholdMs")?;
            super::to_value(ctx.list_dead_workers(threshold_ms))
        }

        _ => Err(format!("Unknown worker command: {}", cmd).into()),
    }
}

/// Check if a command is a worker command
pub fn is_worker_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "spawn_worker"
            | "list_workers"
            | "get_worker_status"
            | "pause_worker"
            | "resume_worker"
            | "heartbeat"
            | "assign_next_task"
            | "abort_worker"
            | "fail_worker"
            | "merge_worker"
            | "worker_complete"
            | "approve_merge"
            | "reject_merge"
            | "stop_worker"
            | "list_dead_workers"
    )
}
