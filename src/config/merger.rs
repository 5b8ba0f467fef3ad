// Configuration merging with priority

use crate::config::loader::{FleetConfig, TimeoutConfig};
use crate::models::MergeStrategy;
use serde::{Deserialize, Serialize};

/// Partial configuration for merging
/// Uses Option<T> for all fields to support partial overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialFleetConfig {
    #[serde(alias = "maxWorkers", default)]
    pub max_workers: Option<usize>,
    #[serde(alias = "targetBranch", default)]
    pub target_branch: Option<String>,
    #[serde(alias = "mergeStrategy", default)]
    pub merge_strategy: Option<MergeStrategy>,
    #[serde(alias = "requireApproval", default)]
    pub require_approval: Option<bool>,
    #[serde(alias = "deleteBranchOnMerge", default)]
    pub delete_branch_on_merge: Option<bool>,
    #[serde(alias = "branchPrefix", default)]
    pub branch_prefix: Option<String>,
    #[serde(alias = "worktreeDir", default)]
    pub worktree_dir: Option<String>,
    #[serde(alias = "startCommand", default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub timeouts: Option<PartialTimeoutConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialTimeoutConfig {
    #[serde(alias = "pendingTimeoutSecs", default)]
    pub pending_timeout_secs: Option<u64>,
    #[serde(alias = "activeTimeoutSecs", default)]
    pub active_timeout_secs: Option<u64>,
    #[serde(alias = "heartbeatIntervalSecs", default)]
    pub heartbeat_interval_secs: Option<u64>,
    #[serde(alias = "mergeTimeoutSecs", default)]
    pub merge_timeout_secs: Option<u64>,
}

/// Configuration merger
/// Priority order: CLI -> Project -> Global -> Defaults
pub struct ConfigMerger {
    defaults: FleetConfig,
    global: Option<PartialFleetConfig>,
    project: Option<PartialFleetConfig>,
    cli: Option<PartialFleetConfig>,
}

impl ConfigMerger {
    /// Create a new config merger with defaults
    pub fn new() -> Self {
        Self {
            defaults: FleetConfig::default(),
            global: None,
            project: None,
            cli: None,
        }
    }

    /// Set global config
    pub fn with_global(mut self, config: Option<PartialFleetConfig>) -> Self {
        self.global = config;
        self
    }

    /// Set project config
    pub fn with_project(mut self, config: Option<PartialFleetConfig>) -> Self {
        self.project = config;
        self
    }

    /// Set CLI overrides
    pub fn with_cli(mut self, config: Option<PartialFleetConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all layers with priority
    pub fn merge(&self) -> FleetConfig {
        let mut result = self.defaults.clone();

        for layer in [&self.global, &self.project, &self.cli].into_iter().flatten() {
            result = self.merge_partial(&result, layer);
        }

        result
    }

    /// Merge partial config into full config
    fn merge_partial(&self, base: &FleetConfig, partial: &PartialFleetConfig) -> FleetConfig {
        FleetConfig {
            max_workers: partial.max_workers.unwrap_or(base.max_workers),
            target_branch: partial
                .target_branch
                .clone()
                .or_else(|| base.target_branch.clone()),
            merge_strategy: partial.merge_strategy.unwrap_or(base.merge_strategy),
            require_approval: partial.require_approval.unwrap_or(base.require_approval),
            delete_branch_on_merge: partial
                .delete_branch_on_merge
                .unwrap_or(base.delete_branch_on_merge),
            branch_prefix: partial
                .branch_prefix
                .clone()
                .unwrap_or_else(|| base.branch_prefix.clone()),
            worktree_dir: partial
                .worktree_dir
                .clone()
                .or_else(|| base.worktree_dir.clone()),
            start_command: partial
                .start_command
                .clone()
                .unwrap_or_else(|| base.start_command.clone()),
            timeouts: partial
                .timeouts
                .as_ref()
                .map(|p| self.merge_partial_timeouts(&base.timeouts, p))
                .unwrap_or_else(|| base.timeouts.clone()),
        }
    }

    fn merge_partial_timeouts(
        &self,
        base: &TimeoutConfig,
        partial: &PartialTimeoutConfig,
    ) -> TimeoutConfig {
        TimeoutConfig {
            pending_timeout_secs: partial
                .pending_timeout_secs
                .unwrap_or(base.pending_timeout_secs),
            active_timeout_secs: partial
                .active_timeout_secs
                .unwrap_or(base.active_timeout_secs),
            heartbeat_interval_secs: partial
                .heartbeat_interval_secs
                .unwrap_or(base.heartbeat_interval_secs),
            merge_timeout_secs: partial
                .merge_timeout_secs
                .unwrap_or(base.merge_timeout_secs),
        }
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_defaults_only() {
        let config = ConfigMerger::new().merge();
        assert_eq!(config, FleetConfig::default());
    }

    #[test]
    fn test_layer_priority() {
        let global = PartialFleetConfig {
            max_workers: Some(4),
            branch_prefix: Some("agents/".to_string()),
            ..Default::default()
        };
        let project = PartialFleetConfig {
            max_workers: Some(6),
            require_approval: Some(true),
            ..Default::default()
        };
        let cli = PartialFleetConfig {
            max_workers: Some(2),
            ..Default::default()
        };

        let config = ConfigMerger::new()
            .with_global(Some(global))
            .with_project(Some(project))
            .with_cli(Some(cli))
            .merge();

        assert_eq!(config.max_workers, 2);
        assert!(config.require_approval);
        assert_eq!(config.branch_prefix, "agents/");
        assert!(config.delete_branch_on_merge);
    }

    #[test]
    fn test_partial_timeouts_keep_other_defaults() {
        let project = PartialFleetConfig {
            timeouts: Some(PartialTimeoutConfig {
                merge_timeout_secs: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = ConfigMerger::new().with_project(Some(project)).merge();
        assert_eq!(config.timeouts.merge_timeout_secs, 5);
        assert_eq!(config.timeouts.active_timeout_secs, 120);
        assert_eq!(config.timeouts.pending_timeout_secs, 600);
    }
}
