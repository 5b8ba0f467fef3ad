use anyhow::{anyhow, Context, Result};
use clap::Parser;
use fleet_lib::config::{get_config_paths, PartialFleetConfig};
use fleet_lib::models::MergeStrategy;
use fleet_lib::server::{self, generate_auth_token, ServerAppState};
use fleet_lib::shutdown::{register_signal_handlers, shut_down, ShutdownState};
use std::path::PathBuf;

/// Fleet - coordinator for coding agents working in isolated git worktrees
#[derive(Parser, Debug)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository to coordinate (commands may name others with repoPath)
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Port to bind the server to
    #[arg(long, default_value = "3430")]
    port: u16,

    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Fixed auth token (or set FLEET_SERVER_TOKEN env var)
    /// If not provided, a random token is generated on each startup
    #[arg(long, env = "FLEET_SERVER_TOKEN")]
    token: Option<String>,

    /// Allowed CORS origin (repeatable); any origin when omitted
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,

    /// Maximum number of workers in a non-terminal status
    #[arg(long)]
    max_workers: Option<usize>,

    /// Branch workers fork from and merge into
    #[arg(long)]
    target_branch: Option<String>,

    /// Merge strategy: squash, merge or rebase
    #[arg(long)]
    strategy: Option<MergeStrategy>,

    /// Hold clean merges until approved
    #[arg(long)]
    require_approval: bool,
}

impl Cli {
    fn config_overrides(&self) -> PartialFleetConfig {
        PartialFleetConfig {
            max_workers: self.max_workers,
            target_branch: self.target_branch.clone(),
            merge_strategy: self.strategy,
            require_approval: self.require_approval.then_some(true),
            ..Default::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger
    env_logger::init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    rt.block_on(async {
        let shutdown_state = ShutdownState::new();
        if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
            log::warn!("Failed to register signal handlers: {}", e);
        }

        // Use provided token or generate a random one
        let auth_token = cli.token.clone().unwrap_or_else(generate_auth_token);

        let state = ServerAppState::new(
            auth_token,
            Some(cli.repo.clone()),
            Some(cli.config_overrides()),
            shutdown_state.clone(),
        );

        // Open the default repository up front so a bad path or a second
        // coordinator fails at startup
        let context = state
            .context_for(None)
            .with_context(|| format!("Failed to open repository {:?}", cli.repo))?;
        log::info!(
            "[Fleet] Coordinating {:?} ({} worker(s) registered)",
            context.repo_path(),
            context.list_workers(None).workers.len()
        );
        let (global_config, project_config) = get_config_paths(Some(context.repo_path()));
        log::debug!(
            "[Fleet] Config layers: global {:?}, project {:?}",
            global_config,
            project_config
        );

        let cors_origins = (!cli.cors_origins.is_empty()).then(|| cli.cors_origins.clone());
        server::run_server(cli.port, &cli.bind, state.clone(), cors_origins)
            .await
            .map_err(|e| anyhow!(e))?;

        shut_down(&shutdown_state, &state.open_contexts());
        Ok(())
    })
}
