//! Command surface tests: /api/invoke dispatch, error mapping and auth

mod common;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::Json;
use common::*;
use fleet_lib::server::{self, invoke_handler, InvokeRequest, ServerAppState};
use fleet_lib::shutdown::ShutdownState;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "test-token";

fn server_state(repo: &TempDir, max_workers: usize) -> ServerAppState {
    let state = ServerAppState::new(
        TOKEN.to_string(),
        Some(repo.path().to_path_buf()),
        None,
        ShutdownState::new(),
    );
    state.register_context(open_context(repo, with_max_workers(max_workers)));
    state
}

async fn invoke(state: &ServerAppState, cmd: &str, args: Value) -> Result<Value, (StatusCode, Value)> {
    let request = InvokeRequest {
        cmd: cmd.to_string(),
        args,
    };
    match invoke_handler(State(state.clone()), Json(request)).await {
        Ok(Json(response)) => {
            assert!(response.success);
            Ok(response.data.unwrap_or(Value::Null))
        }
        Err(e) => {
            let body = serde_json::to_value(e.body()).unwrap();
            Err((e.status, body))
        }
    }
}

#[tokio::test]
async fn test_spawn_and_list() {
    let repo = init_repo();
    let state = server_state(&repo, 3);

    let spawned = invoke(
        &state,
        "spawn_worker",
        json!({ "taskId": "SD.3", "taskTitle": "Login form" }),
    )
    .await
    .unwrap();
    let worker_id = spawned["workerId"].as_str().unwrap().to_string();
    assert!(spawned["branchName"].as_str().unwrap().starts_with("fleet/"));
    assert!(spawned["startCommand"].as_str().unwrap().contains(&worker_id));

    let listing = invoke(&state, "list_workers", json!({})).await.unwrap();
    assert_eq!(listing["maxWorkers"], 3);
    assert_eq!(listing["activeCount"], 1);
    assert_eq!(listing["canSpawn"], true);
    assert_eq!(listing["workers"][0]["id"], worker_id.as_str());
    assert_eq!(listing["workers"][0]["status"], "pending");
}

#[tokio::test]
async fn test_capacity_error_carries_code_and_details() {
    let repo = init_repo();
    let state = server_state(&repo, 1);

    invoke(&state, "spawn_worker", json!({ "taskId": "SD.3", "taskTitle": "a" }))
        .await
        .unwrap();
    let (status, body) = invoke(&state, "spawn_worker", json!({ "taskId": "SD.4", "taskTitle": "b" }))
        .await
        .unwrap_err();

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["errorCode"], "capacity_exceeded");
    assert_eq!(body["details"]["maxWorkers"], 1);
    assert_eq!(body["details"]["active"], 1);
}

#[tokio::test]
async fn test_heartbeat_by_workspace_path() {
    let repo = init_repo();
    let state = server_state(&repo, 3);

    let spawned = invoke(&state, "spawn_worker", json!({ "taskId": "SD.3", "taskTitle": "a" }))
        .await
        .unwrap();
    let workspace = spawned["workspacePath"].as_str().unwrap();

    let response = invoke(
        &state,
        "heartbeat",
        json!({ "workspacePath": workspace, "progress": 40, "message": "halfway" }),
    )
    .await
    .unwrap();
    assert_eq!(response["status"], "working");
    assert_eq!(response["shouldPause"], false);
    assert_eq!(response["shouldAbort"], false);
    assert_eq!(response["heartbeatIntervalSecs"], 30);

    invoke(&state, "pause_worker", json!({ "workerId": spawned["workerId"] }))
        .await
        .unwrap();
    let response = invoke(&state, "heartbeat", json!({ "workspacePath": workspace }))
        .await
        .unwrap();
    assert_eq!(response["status"], "paused");
    assert_eq!(response["shouldPause"], true);
}

#[tokio::test]
async fn test_argument_and_lookup_errors() {
    let repo = init_repo();
    let state = server_state(&repo, 3);

    let (_, body) = invoke(&state, "spawn_worker", json!({ "taskId": "SD.3" }))
        .await
        .unwrap_err();
    assert_eq!(body["errorCode"], "invalid_argument");
    assert!(body["error"].as_str().unwrap().contains("taskTitle"));

    let (_, body) = invoke(&state, "get_worker_status", json!({ "workerId": "missing" }))
        .await
        .unwrap_err();
    assert_eq!(body["errorCode"], "not_found");
    assert_eq!(body["details"]["workerId"], "missing");

    let (_, body) = invoke(&state, "teleport_worker", json!({})).await.unwrap_err();
    assert_eq!(body["errorCode"], "unknown_command");
}

#[tokio::test]
async fn test_next_task_title_needs_next_task_id() {
    let repo = init_repo();
    let state = server_state(&repo, 3);

    let (status, body) = invoke(
        &state,
        "spawn_worker",
        json!({ "taskId": "SD.3", "taskTitle": "a", "nextTaskTitle": "Follow-up" }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "invalid_argument");
    assert!(body["error"].as_str().unwrap().contains("nextTaskId"));

    let listing = invoke(&state, "list_workers", json!({})).await.unwrap();
    assert_eq!(listing["activeCount"], 0);
}

#[tokio::test]
async fn test_stop_without_force_is_a_transition_error() {
    let repo = init_repo();
    let state = server_state(&repo, 3);

    let spawned = invoke(&state, "spawn_worker", json!({ "taskId": "SD.3", "taskTitle": "a" }))
        .await
        .unwrap();
    let (_, body) = invoke(&state, "stop_worker", json!({ "workerId": spawned["workerId"] }))
        .await
        .unwrap_err();
    assert_eq!(body["errorCode"], "invalid_state_transition");
    assert_eq!(body["details"]["to"], "stopped");

    let outcome = invoke(
        &state,
        "stop_worker",
        json!({ "workerId": spawned["workerId"], "force": true, "deleteBranch": true }),
    )
    .await
    .unwrap();
    assert_eq!(outcome["workspaceRemoved"], true);
    assert_eq!(outcome["branchDeleted"], true);
}

#[tokio::test]
async fn test_fleet_config_reports_effective_target() {
    let repo = init_repo();
    let state = server_state(&repo, 4);

    let config = invoke(&state, "get_fleet_config", json!({})).await.unwrap();
    assert_eq!(config["maxWorkers"], 4);
    assert_eq!(config["targetBranch"], "main");
}

#[tokio::test]
async fn test_router_requires_bearer_token() {
    let repo = init_repo();
    let state = server_state(&repo, 3);
    let app = server::router(state, None);

    let unauthenticated = Request::builder()
        .method("POST")
        .uri("/api/invoke")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"cmd":"list_workers","args":{}}"#))
        .unwrap();
    let response = app.clone().oneshot(unauthenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let authenticated = Request::builder()
        .method("POST")
        .uri("/api/invoke")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", TOKEN))
        .body(Body::from(r#"{"cmd":"list_workers","args":{}}"#))
        .unwrap();
    let response = app.clone().oneshot(authenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["activeCount"], 0);

    let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(health).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
