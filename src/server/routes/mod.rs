//! Command routing modules
//!
//! Commands are grouped into focused sub-modules by domain:
//! - worker_routes: worker lifecycle, heartbeats, merges and signals
//! - config_routes: effective configuration

pub mod config_routes;
pub mod worker_routes;

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::ServerAppState;
use crate::error::FleetError;
use crate::fleet::RepositoryContext;
use crate::utils::as_path;

/// A failed command, as reported over the proxy
#[derive(Debug, Clone, Serialize)]
pub struct CommandError {
    pub message: String,
    /// Stable snake_case kind
    pub code: String,
    pub details: Value,
}

impl CommandError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.to_string(),
            details: Value::Null,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Argument and serialization failures
impl From<String> for CommandError {
    fn from(message: String) -> Self {
        CommandError::new("invalid_argument", message)
    }
}

impl From<FleetError> for CommandError {
    fn from(error: FleetError) -> Self {
        Self {
            message: error.to_string(),
            code: error.code().to_string(),
            details: error.details(),
        }
    }
}

pub type CommandResult = Result<Value, CommandError>;

// =============================================================================
// Argument helpers
// =============================================================================

/// Extract a required argument from JSON args
pub fn get_arg<T: serde::de::DeserializeOwned>(args: &Value, name: &str) -> Result<T, String> {
    serde_json::from_value(
        args.get(name)
            .ok_or_else(|| format!("Missing argument: {}", name))?
            .clone(),
    )
    .map_err(|e| format!("Invalid argument {}: {}", name, e))
}

/// Extract an optional argument from JSON args
pub fn get_opt_arg<T: serde::de::DeserializeOwned>(
    args: &Value,
    name: &str,
) -> Result<Option<T>, String> {
    match args.get(name) {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| format!("Invalid argument {}: {}", name, e)),
        _ => Ok(None),
    }
}

/// The repository context named by `repoPath`, or the default one
pub fn resolve_context(args: &Value, state: &ServerAppState) -> Result<Arc<RepositoryContext>, CommandError> {
    let repo_path: Option<String> = get_opt_arg(args, "repoPath")?;
    Ok(state.context_for(repo_path.as_deref())?)
}

/// The worker named by `workerId`, or the one owning `workspacePath`
pub fn resolve_worker_id(args: &Value, context: &RepositoryContext) -> Result<String, CommandError> {
    if let Some(worker_id) = get_opt_arg::<String>(args, "workerId")? {
        return Ok(worker_id);
    }
    if let Some(workspace) = get_opt_arg::<String>(args, "workspacePath")? {
        return Ok(context.find_by_workspace(as_path(&workspace))?.id);
    }
    Err(CommandError::from(
        "Missing argument: workerId (or workspacePath)".to_string(),
    ))
}

pub fn to_value<T: Serialize>(result: T) -> CommandResult {
    serde_json::to_value(result).map_err(|e| CommandError::new("serialization_error", e.to_string()))
}

// =============================================================================
// Command Routing Macros
// =============================================================================

/// Routes an async command: awaits the handler and serializes its result
#[macro_export]
macro_rules! route_async {
    ($handler:expr) => {{
        let result = $handler.await?;
        $crate::server::routes::to_value(result)
    }};
}

/// Routes a sync command
#[macro_export]
macro_rules! route_sync {
    ($handler:expr) => {{
        let result = $handler?;
        $crate::server::routes::to_value(result)
    }};
}

// Re-export macros for use in route modules
pub use route_async;
pub use route_sync;

// =============================================================================
// Main Command Dispatcher
// =============================================================================

/// Route a command to its implementation by dispatching to the appropriate sub-router
pub async fn route_command(cmd: &str, args: Value, state: &ServerAppState) -> CommandResult {
    if worker_routes::is_worker_command(cmd) {
        return worker_routes::route_worker_command(cmd, args, state).await;
    }

    if config_routes::is_config_command(cmd) {
        return config_routes::route_config_command(cmd, args, state).await;
    }

    Err(CommandError::new(
        "unknown_command",
        format!("Unknown command: {}", cmd),
    ))
}
