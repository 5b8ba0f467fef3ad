//! Ledger of issued workspace names
//!
//! `.fleet/index.json` records every branch name and workspace path ever
//! handed to a worker in this repository. Entries are never removed, so a
//! name cannot be reissued after its worker is stopped and cleaned up.

use super::{get_fleet_dir, read_json, write_json, FileResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Version of the index file format
const INDEX_VERSION: u32 = 1;

/// Generic index file wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile<T> {
    /// File format version
    pub version: u32,
    /// When this index was last updated
    pub updated_at: DateTime<Utc>,
    /// The indexed entries
    pub entries: Vec<T>,
}

impl<T> Default for IndexFile<T> {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            updated_at: Utc::now(),
            entries: Vec::new(),
        }
    }
}

/// One issued workspace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedNameEntry {
    pub worker_id: String,
    pub branch_name: String,
    pub workspace_path: String,
    pub issued_at: DateTime<Utc>,
}

/// Get the path to the issued-names index
pub fn get_index_path(repo_path: &Path) -> PathBuf {
    get_fleet_dir(repo_path).join("index.json")
}

/// Read the index, returning an empty one if it doesn't exist
pub fn read_issued_names(repo_path: &Path) -> FileResult<IndexFile<IssuedNameEntry>> {
    let index_path = get_index_path(repo_path);

    if !index_path.exists() {
        return Ok(IndexFile::default());
    }

    read_json(&index_path)
}

/// Whether either name was issued before
pub fn is_issued(repo_path: &Path, branch_name: &str, workspace_path: &str) -> FileResult<bool> {
    let index = read_issued_names(repo_path)?;
    Ok(index
        .entries
        .iter()
        .any(|e| e.branch_name == branch_name || e.workspace_path == workspace_path))
}

/// Append an entry to the ledger
pub fn record_issued(repo_path: &Path, entry: IssuedNameEntry) -> FileResult<()> {
    let mut index = read_issued_names(repo_path)?;
    index.version = INDEX_VERSION;
    index.updated_at = Utc::now();
    index.entries.push(entry);

    write_json(&get_index_path(repo_path), &index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(worker_id: &str, branch: &str, path: &str) -> IssuedNameEntry {
        IssuedNameEntry {
            worker_id: worker_id.to_string(),
            branch_name: branch.to_string(),
            workspace_path: path.to_string(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_index_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let index = read_issued_names(temp_dir.path()).unwrap();
        assert_eq!(index.version, INDEX_VERSION);
        assert!(index.entries.is_empty());
    }

    #[test]
    fn test_record_and_check_issued() {
        let temp_dir = TempDir::new().unwrap();

        record_issued(temp_dir.path(), entry("w-1", "fleet/a-111111", "/wt/a")).unwrap();
        record_issued(temp_dir.path(), entry("w-2", "fleet/b-222222", "/wt/b")).unwrap();

        assert!(is_issued(temp_dir.path(), "fleet/a-111111", "/wt/other").unwrap());
        assert!(is_issued(temp_dir.path(), "fleet/other", "/wt/b").unwrap());
        assert!(!is_issued(temp_dir.path(), "fleet/c-333333", "/wt/c").unwrap());

        let index = read_issued_names(temp_dir.path()).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[1].worker_id, "w-2");
    }
}
