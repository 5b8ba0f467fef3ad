//! Configuration command routing
//!
//! Handles: get_fleet_config

use serde_json::Value;

use super::{resolve_context, CommandResult, ServerAppState};

/// Route configuration commands
pub async fn route_config_command(cmd: &str, args: Value, state: &ServerAppState) -> CommandResult {
    match cmd {
        "get_fleet_config" => {
            let ctx = resolve_context(&args, state)?;
            super::to_value(ctx.get_fleet_config())
        }

        _ => Err(format!("Unknown config command: {}", cmd).into()),
    }
}

/// Check if a command is a config command
pub fn is_config_command(cmd: &str) -> bool {
    matches!(cmd, "get_fleet_config")
}
