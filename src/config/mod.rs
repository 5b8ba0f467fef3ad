// Layered configuration system

pub mod loader;
pub mod merger;

// Re-export main types
pub use loader::{ConfigLoader, FleetConfig, TimeoutConfig};
pub use merger::{ConfigMerger, PartialFleetConfig, PartialTimeoutConfig};

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Load and merge configuration from all sources
/// Priority: CLI -> Project -> Global -> Defaults
///
/// A config file that exists but cannot be parsed is an error; a missing one
/// is skipped.
pub fn load_merged_config(
    repo_path: Option<&Path>,
    cli_overrides: Option<PartialFleetConfig>,
) -> Result<FleetConfig> {
    let loader = match repo_path {
        Some(path) => ConfigLoader::new().with_repo_path(path),
        None => ConfigLoader::new(),
    };

    let global = loader.load_global()?;
    let project = loader.load_project()?;

    let config = ConfigMerger::new()
        .with_global(global)
        .with_project(project)
        .with_cli(cli_overrides)
        .merge();

    loader.validate_config(&config)?;
    Ok(config)
}

/// Get config file paths for debugging
pub fn get_config_paths(repo_path: Option<&Path>) -> (Option<PathBuf>, Option<PathBuf>) {
    let loader = match repo_path {
        Some(path) => ConfigLoader::new().with_repo_path(path),
        None => ConfigLoader::new(),
    };

    (
        loader.global_config_path().map(|p| p.to_path_buf()),
        loader.project_config_path().map(|p| p.to_path_buf()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MergeStrategy;
    use std::fs;
    use tempfile::TempDir;

    fn without_global(repo: &Path, cli: Option<PartialFleetConfig>) -> FleetConfig {
        let loader = ConfigLoader::new().without_global().with_repo_path(repo);
        ConfigMerger::new()
            .with_global(loader.load_global().unwrap())
            .with_project(loader.load_project().unwrap())
            .with_cli(cli)
            .merge()
    }

    #[test]
    fn test_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = without_global(temp_dir.path(), None);

        assert_eq!(config.max_workers, 3);
        assert_eq!(config.merge_strategy, MergeStrategy::Squash);
        assert_eq!(config.timeouts.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_project_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join(".fleet");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("config.yaml"),
            "max_workers: 5\nmerge_strategy: rebase\ntimeouts:\n  active_timeout_secs: 45\n",
        )
        .unwrap();

        let config = without_global(temp_dir.path(), None);
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.merge_strategy, MergeStrategy::Rebase);
        assert_eq!(config.timeouts.active_timeout_secs, 45);
        assert_eq!(config.timeouts.pending_timeout_secs, 600);
        assert!(config.delete_branch_on_merge);
    }

    #[test]
    fn test_cli_overrides_project() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join(".fleet");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.yaml"), "max_workers: 5\n").unwrap();

        let cli = PartialFleetConfig {
            max_workers: Some(10),
            ..Default::default()
        };

        let config = without_global(temp_dir.path(), Some(cli));
        assert_eq!(config.max_workers, 10);
    }

    #[test]
    fn test_invalid_project_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join(".fleet");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.yaml"), "max_workers: [not, a, number]\n").unwrap();

        let loader = ConfigLoader::new().without_global().with_repo_path(temp_dir.path());
        assert!(loader.load_project().is_err());
    }
}
