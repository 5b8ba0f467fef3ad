//! Core GitManager implementation
//!
//! Contains the GitManager struct and its basic operations

use git2::{Error as GitError, Repository, Signature};
use std::path::{Path, PathBuf};

/// Git manager for repository operations
pub struct GitManager {
    pub(crate) repo: Repository,
}

impl GitManager {
    /// Create a new GitManager for the given repository path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Get the repository path (the `.git` directory)
    pub fn repo_path(&self) -> PathBuf {
        self.repo.path().to_path_buf()
    }

    /// Get the working directory, if the repository has one
    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    /// Get a reference to the underlying repository
    pub(crate) fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Signature used for commits written by the coordinator
    pub(crate) fn signature(&self) -> Result<Signature<'static>, GitError> {
        self.repo
            .signature()
            .or_else(|_| Signature::now("Fleet Coordinator", "fleet@localhost"))
    }
}
