//! Server application state shared across handlers

use crate::config::PartialFleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::fleet::context::{repository_root, RepositoryContext};
use crate::shutdown::ShutdownState;
use crate::utils::lock_mutex_recover;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Shared state for the server: one coordinator context per repository,
/// opened on first use and keyed by canonical repository root.
#[derive(Clone)]
pub struct ServerAppState {
    /// Authentication token for this session
    pub auth_token: String,

    /// Repository used when a command names none
    pub default_repo: Option<PathBuf>,

    /// Configuration overrides from the command line
    pub cli_overrides: Option<PartialFleetConfig>,

    /// Open repository contexts
    pub contexts: Arc<Mutex<HashMap<PathBuf, Arc<RepositoryContext>>>>,

    /// Shutdown state
    pub shutdown_state: ShutdownState,
}

impl ServerAppState {
    pub fn new(
        auth_token: String,
        default_repo: Option<PathBuf>,
        cli_overrides: Option<PartialFleetConfig>,
        shutdown_state: ShutdownState,
    ) -> Self {
        Self {
            auth_token,
            default_repo,
            cli_overrides,
            contexts: Arc::new(Mutex::new(HashMap::new())),
            shutdown_state,
        }
    }

    /// Context for `repo_path`, or for the default repository
    pub fn context_for(&self, repo_path: Option<&str>) -> FleetResult<Arc<RepositoryContext>> {
        let requested = match (repo_path, &self.default_repo) {
            (Some(path), _) => PathBuf::from(path),
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(FleetError::Config(
                    "No repository given and no default repository configured".to_string(),
                ))
            }
        };
        let root = repository_root(&requested)?;

        let mut contexts = lock_mutex_recover(&self.contexts);
        if let Some(context) = contexts.get(&root) {
            return Ok(context.clone());
        }

        let context = Arc::new(RepositoryContext::open(&root, self.cli_overrides.clone())?);
        contexts.insert(root, context.clone());
        Ok(context)
    }

    /// Make an already-open context available to commands
    pub fn register_context(&self, context: RepositoryContext) -> Arc<RepositoryContext> {
        let context = Arc::new(context);
        lock_mutex_recover(&self.contexts).insert(context.repo_path().to_path_buf(), context.clone());
        context
    }

    /// Open contexts, ordered by repository path
    pub fn open_contexts(&self) -> Vec<Arc<RepositoryContext>> {
        let mut contexts: Vec<Arc<RepositoryContext>> =
            lock_mutex_recover(&self.contexts).values().cloned().collect();
        contexts.sort_by(|a, b| a.repo_path().cmp(b.repo_path()));
        contexts
    }
}
