//! File-based storage for coordinator state
//!
//! Everything lives in `.fleet/` inside the managed repository:
//! - `workers/` - One state file per registered worker
//! - `worktrees/` - Default location of worker workspaces
//! - `index.json` - Ledger of every branch name and workspace path ever issued
//! - `coordinator.lock` - Held by the process managing the repository
//!
//! The directory carries a `.gitignore` of `*` so none of it is ever committed.
//!
//! Global user storage (`~/.fleet/`) only holds `config.yaml`.

pub mod index;
pub mod workers;

use crate::utils::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Get the .fleet directory for a repository
pub fn get_fleet_dir(repo_path: &Path) -> PathBuf {
    repo_path.join(".fleet")
}

/// Get the global .fleet directory in user home
pub fn get_global_fleet_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".fleet"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    fs::write(&temp_path, content)
        .with_context(&format!("Failed to write temp file {:?}", temp_path))?;

    fs::rename(&temp_path, path)
        .with_context(&format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path).with_context(&format!("Failed to read file {:?}", path))?;

    serde_json::from_str(&content).with_context(&format!("Failed to parse JSON from {:?}", path))
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

/// Initialize the .fleet directory for a repository with its .gitignore
pub fn init_fleet_dir(repo_path: &Path) -> FileResult<PathBuf> {
    let fleet_dir = get_fleet_dir(repo_path);
    ensure_dir(&fleet_dir)?;
    ensure_dir(&fleet_dir.join("workers"))?;
    ensure_dir(&fleet_dir.join("worktrees"))?;

    let gitignore_path = fleet_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(&gitignore_path, "*\n")
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    Ok(fleet_dir)
}
