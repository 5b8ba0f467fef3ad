//! Worker state file storage
//!
//! Stores one file per worker in `.fleet/workers/{worker_id}.json`.
//! Files are rewritten on every registry mutation and reloaded when a
//! repository is opened, so a restarted coordinator keeps its table.

use super::{ensure_dir, get_fleet_dir, read_json, write_json, FileResult};
use crate::models::Worker;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Version of the worker state file format
const WORKER_FILE_VERSION: u32 = 1;

/// Worker state file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStateFile {
    /// File format version
    pub version: u32,
    #[serde(flatten)]
    pub worker: Worker,
}

impl From<&Worker> for WorkerStateFile {
    fn from(worker: &Worker) -> Self {
        Self {
            version: WORKER_FILE_VERSION,
            worker: worker.clone(),
        }
    }
}

/// Get the workers directory path for a repository
pub fn get_workers_dir(repo_path: &Path) -> PathBuf {
    get_fleet_dir(repo_path).join("workers")
}

/// Get the file path for a worker's state
pub fn get_worker_file_path(repo_path: &Path, worker_id: &str) -> PathBuf {
    get_workers_dir(repo_path).join(format!("{}.json", worker_id))
}

/// Save worker state to file
pub fn save_worker_state(repo_path: &Path, worker: &Worker) -> FileResult<PathBuf> {
    ensure_dir(&get_workers_dir(repo_path))?;

    let file_path = get_worker_file_path(repo_path, &worker.id);
    write_json(&file_path, &WorkerStateFile::from(worker))?;

    log::debug!("[Storage] Saved worker {} state to {:?}", worker.id, file_path);
    Ok(file_path)
}

/// Read worker state from file
pub fn read_worker_state(repo_path: &Path, worker_id: &str) -> FileResult<Worker> {
    let file_path = get_worker_file_path(repo_path, worker_id);
    let state: WorkerStateFile = read_json(&file_path)?;

    if state.version > WORKER_FILE_VERSION {
        return Err(format!(
            "Worker file {:?} has unsupported version {}",
            file_path, state.version
        ));
    }

    Ok(state.worker)
}

/// Delete a worker's state file. Missing files are not an error.
pub fn delete_worker_file(repo_path: &Path, worker_id: &str) -> FileResult<()> {
    let state_path = get_worker_file_path(repo_path, worker_id);

    if state_path.exists() {
        fs::remove_file(&state_path)
            .map_err(|e| format!("Failed to delete worker state file: {}", e))?;
        log::debug!("[Storage] Deleted worker state file: {:?}", state_path);
    }

    Ok(())
}

/// List all worker IDs with a state file
pub fn list_worker_ids(repo_path: &Path) -> FileResult<Vec<String>> {
    let workers_dir = get_workers_dir(repo_path);

    if !workers_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&workers_dir)
        .map_err(|e| format!("Failed to read workers directory: {}", e))?;

    let mut worker_ids = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read directory entry: {}", e))?;
        let path = entry.path();

        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }

        if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
            worker_ids.push(id.to_string());
        }
    }

    worker_ids.sort();
    Ok(worker_ids)
}

/// Load every readable worker file. Unreadable files are skipped with a warning.
pub fn load_all_workers(repo_path: &Path) -> FileResult<Vec<Worker>> {
    let mut workers = Vec::new();

    for worker_id in list_worker_ids(repo_path)? {
        match read_worker_state(repo_path, &worker_id) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                log::warn!("[Storage] Failed to read worker {}: {}", worker_id, e);
            }
        }
    }

    Ok(workers)
}
