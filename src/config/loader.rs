// Configuration file loading

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::merger::PartialFleetConfig;
use crate::models::MergeStrategy;

/// Default command template handed back by spawn
pub const DEFAULT_START_COMMAND: &str =
    "cd {{ workspace_path }} && FLEET_WORKER_ID={{ worker_id }} FLEET_TASK_ID={{ task_id }} claude";

/// Effective coordinator configuration for one repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    /// Maximum workers in a non-terminal status
    #[serde(rename = "maxWorkers", alias = "max_workers", default = "default_max_workers")]
    pub max_workers: usize,
    /// Branch workers fork from and merge into (defaults to the checked-out branch)
    #[serde(rename = "targetBranch", alias = "target_branch", default)]
    pub target_branch: Option<String>,
    #[serde(rename = "mergeStrategy", alias = "merge_strategy", default)]
    pub merge_strategy: MergeStrategy,
    /// Hold clean merges until approved
    #[serde(rename = "requireApproval", alias = "require_approval", default)]
    pub require_approval: bool,
    #[serde(rename = "deleteBranchOnMerge", alias = "delete_branch_on_merge", default = "default_true")]
    pub delete_branch_on_merge: bool,
    #[serde(rename = "branchPrefix", alias = "branch_prefix", default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Workspace root; relative paths resolve against the repository
    #[serde(rename = "worktreeDir", alias = "worktree_dir", default)]
    pub worktree_dir: Option<String>,
    /// Template for the launch command returned by spawn
    #[serde(rename = "startCommand", alias = "start_command", default = "default_start_command")]
    pub start_command: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_max_workers() -> usize { 3 }
fn default_true() -> bool { true }
fn default_branch_prefix() -> String { "fleet/".to_string() }
fn default_start_command() -> String { DEFAULT_START_COMMAND.to_string() }

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            target_branch: None,
            merge_strategy: MergeStrategy::default(),
            require_approval: false,
            delete_branch_on_merge: default_true(),
            branch_prefix: default_branch_prefix(),
            worktree_dir: None,
            start_command: default_start_command(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Directory holding worker workspaces for `repo_path`
    pub fn resolve_worktree_dir(&self, repo_path: &Path) -> PathBuf {
        match self.worktree_dir {
            Some(ref dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(ref dir) => repo_path.join(dir),
            None => repo_path.join(".fleet").join("worktrees"),
        }
    }
}

/// Liveness and merge timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    /// A pending worker with no first heartbeat is dead after this long
    #[serde(rename = "pendingTimeoutSecs", alias = "pending_timeout_secs", default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,
    /// An active worker silent for this long is dead
    #[serde(rename = "activeTimeoutSecs", alias = "active_timeout_secs", default = "default_active_timeout")]
    pub active_timeout_secs: u64,
    /// Interval workers are told to heartbeat at
    #[serde(rename = "heartbeatIntervalSecs", alias = "heartbeat_interval_secs", default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Upper bound on a merge dry run
    #[serde(rename = "mergeTimeoutSecs", alias = "merge_timeout_secs", default = "default_merge_timeout")]
    pub merge_timeout_secs: u64,
}

fn default_pending_timeout() -> u64 { 600 }
fn default_active_timeout() -> u64 { 120 }
fn default_heartbeat_interval() -> u64 { 30 }
fn default_merge_timeout() -> u64 { 60 }

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: default_pending_timeout(),
            active_timeout_secs: default_active_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            merge_timeout_secs: default_merge_timeout(),
        }
    }
}

/// Config loader
pub struct ConfigLoader {
    /// Global config path
    global_path: Option<PathBuf>,
    /// Project config path
    project_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self {
            global_path: Self::get_global_config_path(),
            project_path: None,
        }
    }

    /// Set the repository whose `.fleet/config.yaml` is the project layer
    pub fn with_repo_path(mut self, path: &Path) -> Self {
        self.project_path = Some(crate::utils::config_path(path));
        self
    }

    /// Ignore the global config file
    pub fn without_global(mut self) -> Self {
        self.global_path = None;
        self
    }

    /// Get the global config path
    fn get_global_config_path() -> Option<PathBuf> {
        crate::file_storage::get_global_fleet_dir().map(|dir| dir.join("config.yaml"))
    }

    /// Load global config
    pub fn load_global(&self) -> Result<Option<PartialFleetConfig>> {
        match self.global_path {
            Some(ref path) => self.load_from_path(path),
            None => Ok(None),
        }
    }

    /// Load project config
    pub fn load_project(&self) -> Result<Option<PartialFleetConfig>> {
        match self.project_path {
            Some(ref path) => self.load_from_path(path),
            None => Ok(None),
        }
    }

    /// Load a config layer from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<Option<PartialFleetConfig>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

        if contents.trim().is_empty() {
            return Ok(Some(PartialFleetConfig::default()));
        }

        let config: PartialFleetConfig = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

        log::debug!("[Config] Loaded config layer from {}", path.display());
        Ok(Some(config))
    }

    /// Validate config values
    pub fn validate_config(&self, config: &FleetConfig) -> Result<()> {
        if config.max_workers == 0 {
            return Err(anyhow!("max_workers must be greater than 0"));
        }

        if config.branch_prefix.contains("..") || config.branch_prefix.contains(' ') {
            return Err(anyhow!("branch_prefix '{}' is not a valid ref prefix", config.branch_prefix));
        }

        let timeouts = &config.timeouts;
        if timeouts.active_timeout_secs == 0
            || timeouts.pending_timeout_secs == 0
            || timeouts.heartbeat_interval_secs == 0
            || timeouts.merge_timeout_secs == 0
        {
            return Err(anyhow!("timeouts must be greater than 0"));
        }

        if timeouts.heartbeat_interval_secs >= timeouts.active_timeout_secs {
            log::warn!(
                "[Config] heartbeat_interval_secs ({}) is not below active_timeout_secs ({}); live workers may be reported dead",
                timeouts.heartbeat_interval_secs,
                timeouts.active_timeout_secs
            );
        }

        Ok(())
    }

    /// Get the global config path
    pub fn global_config_path(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Get the project config path
    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new().without_global();
        let result = loader
            .load_from_path(&temp_dir.path().join("missing.yaml"))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_camel_case_keys_are_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "maxWorkers: 7\nrequireApproval: true\n").unwrap();

        let loader = ConfigLoader::new().without_global();
        let partial = loader.load_from_path(&path).unwrap().unwrap();
        assert_eq!(partial.max_workers, Some(7));
        assert_eq!(partial.require_approval, Some(true));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let loader = ConfigLoader::new().without_global();
        let config = FleetConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(loader.validate_config(&config).is_err());
        assert!(loader.validate_config(&FleetConfig::default()).is_ok());
    }

    #[test]
    fn test_resolve_worktree_dir() {
        let repo = Path::new("/repo");
        let mut config = FleetConfig::default();
        assert_eq!(config.resolve_worktree_dir(repo), PathBuf::from("/repo/.fleet/worktrees"));

        config.worktree_dir = Some("../wt".to_string());
        assert_eq!(config.resolve_worktree_dir(repo), PathBuf::from("/repo/../wt"));

        config.worktree_dir = Some("/abs/wt".to_string());
        assert_eq!(config.resolve_worktree_dir(repo), PathBuf::from("/abs/wt"));
    }

    #[test]
    fn test_config_serializes_camel_case() {
        let json = serde_json::to_value(FleetConfig::default()).unwrap();
        assert_eq!(json["maxWorkers"], 3);
        assert_eq!(json["mergeStrategy"], "squash");
        assert_eq!(json["timeouts"]["mergeTimeoutSecs"], 60);
    }
}
