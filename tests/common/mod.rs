//! Shared fixtures for integration tests
#![allow(dead_code)]

use fleet_lib::config::FleetConfig;
use fleet_lib::fleet::{HeartbeatRequest, RepositoryContext, SpawnRequest, SpawnedWorker};
use git2::{Oid, Repository, Signature};
use std::path::Path;
use tempfile::TempDir;

/// A repository on `main` with one commit holding README.md and notes.txt
pub fn init_repo() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(temp_dir.path(), &opts).unwrap();

    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();

    std::fs::write(temp_dir.path().join("README.md"), "# Test\n").unwrap();
    std::fs::write(temp_dir.path().join("notes.txt"), "one\ntwo\nthree\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.add_path(Path::new("notes.txt")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test User", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .unwrap();

    temp_dir
}

/// Write a file in a checkout and commit it on that checkout's branch
pub fn commit_file(workdir: &Path, file: &str, content: &str, message: &str) -> Oid {
    let repo = Repository::open(workdir).unwrap();
    std::fs::write(workdir.join(file), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let sig = Signature::now("Test User", "test@example.com").unwrap();
    let parent = repo.head().unwrap().peel_to_commit().unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .unwrap()
}

pub fn branch_tip(repo: &Path, branch: &str) -> Oid {
    Repository::open(repo)
        .unwrap()
        .find_branch(branch, git2::BranchType::Local)
        .unwrap()
        .get()
        .peel_to_commit()
        .unwrap()
        .id()
}

pub fn open_context(repo: &TempDir, config: FleetConfig) -> RepositoryContext {
    RepositoryContext::open_with_config(repo.path(), config).unwrap()
}

pub fn with_max_workers(max_workers: usize) -> FleetConfig {
    FleetConfig {
        max_workers,
        ..Default::default()
    }
}

/// Spawn a worker and send its first heartbeat so it is working
pub fn spawn_working(ctx: &RepositoryContext, task_id: &str) -> SpawnedWorker {
    let spawned = ctx
        .spawn_worker(SpawnRequest {
            task_id: task_id.to_string(),
            task_title: format!("Task {}", task_id),
            ..Default::default()
        })
        .unwrap();
    ctx.heartbeat(HeartbeatRequest {
        worker_id: spawned.worker_id.clone(),
        ..Default::default()
    })
    .unwrap();
    spawned
}
