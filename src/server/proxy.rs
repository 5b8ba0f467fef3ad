//! Command proxy handler that routes HTTP requests to fleet commands
//!
//! A single /api/invoke endpoint takes `{cmd, args}` and dispatches to the
//! sub-routers in `routes/`:
//! - worker_routes: worker lifecycle, heartbeats, merges and signals
//! - config_routes: effective configuration

use super::routes::{self, CommandError};
use super::ServerAppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for /api/invoke endpoint
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    /// Command name (e.g., "spawn_worker", "heartbeat")
    pub cmd: String,
    /// Command arguments as JSON object
    #[serde(default)]
    pub args: Value,
}

/// Response body for /api/invoke endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    /// Whether the command succeeded
    pub success: bool,
    /// Result data (on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error kind (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Structured error fields (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Error type for invoke handler
#[derive(Debug)]
pub struct InvokeError {
    pub status: StatusCode,
    pub error: CommandError,
}

impl InvokeError {
    pub fn body(&self) -> InvokeResponse {
        InvokeResponse {
            success: false,
            data: None,
            error: Some(self.error.message.clone()),
            error_code: Some(self.error.code.clone()),
            details: (!self.error.details.is_null()).then(|| self.error.details.clone()),
        }
    }
}

impl IntoResponse for InvokeError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

/// Main invoke handler - routes commands to their implementations
pub async fn invoke_handler(
    State(state): State<ServerAppState>,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<InvokeResponse>, InvokeError> {
    log::debug!("Invoke command: {} with args: {:?}", req.cmd, req.args);

    match routes::route_command(&req.cmd, req.args, &state).await {
        Ok(data) => Ok(Json(InvokeResponse {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
            details: None,
        })),
        Err(e) => {
            log::warn!("Command {} failed: {}", req.cmd, e);
            Err(InvokeError {
                status: StatusCode::BAD_REQUEST,
                error: e,
            })
        }
    }
}
