mod cli;
mod output;

use crate::cli::{Args, Commands};
use anyhow::{Context, Result, bail};
use clap::Parser;
use keeper_engine::{
    CredentialVault, Credentials, KeeperConfig, LogNotifier, Orchestrator, SessionStatus,
    StateStore,
};
use portal_client::{PortalClient, Prober, build_client};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    let data_dir = resolve_data_dir(args.data_dir)?;
    config.resolve_paths(&data_dir);

    let store = StateStore::new(
        config
            .state_path
            .clone()
            .expect("state path resolved above"),
    );
    let vault = CredentialVault::new(config.key_path.clone().expect("key path resolved above"));

    match args.command {
        Commands::Run => run_daemon(config, store, vault).await,
        Commands::Login => login_once(config, store, vault).await,
        Commands::Status { json } => show_status(&store, json),
        Commands::Pause => set_paused(&store, true),
        Commands::Resume => set_paused(&store, false),
        Commands::SetCredentials { username } => set_credentials(&store, &vault, username),
        Commands::ClearCredentials => clear_credentials(&store),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<KeeperConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => dirs::config_dir().map(|dir| dir.join("portal-keeper/config.toml")),
    };

    match path {
        Some(path) if path.exists() => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config = toml::from_str(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            info!(path = %path.display(), "loaded config");
            Ok(config)
        }
        Some(path) if explicit.is_some() => {
            bail!("config file {} does not exist", path.display())
        }
        _ => Ok(KeeperConfig::default()),
    }
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("portal-keeper"))
        .context("could not determine a data directory; pass --data-dir")
}

fn build_keeper(
    config: KeeperConfig,
    store: StateStore,
    vault: CredentialVault,
    cancel: CancellationToken,
) -> Result<(Orchestrator, keeper_engine::KeeperHandle)> {
    let client = build_client(config.portal.request_timeout())
        .context("failed to build HTTP client")?;
    let prober = Arc::new(Prober::new(client.clone(), config.portal.clone()));
    let portal = Arc::new(PortalClient::new(client, config.portal.clone()));

    Orchestrator::new(
        config,
        prober,
        portal,
        Arc::new(LogNotifier),
        vault,
        store,
        cancel,
    )
    .context("failed to start keeper")
}

async fn run_daemon(config: KeeperConfig, store: StateStore, vault: CredentialVault) -> Result<()> {
    let cancel = CancellationToken::new();
    let check_interval = config.check_interval();
    let (orchestrator, handle) = build_keeper(config, store, vault, cancel.clone())?;

    let actor = tokio::spawn(orchestrator.run());
    let ticker = handle.spawn_ticker(check_interval, cancel.clone());

    info!(
        interval_secs = check_interval.as_secs(),
        "portal keeper running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    cancel.cancel();
    let _ = ticker.await;
    let _ = actor.await;
    Ok(())
}

async fn login_once(config: KeeperConfig, store: StateStore, vault: CredentialVault) -> Result<()> {
    let cancel = CancellationToken::new();
    let (orchestrator, handle) = build_keeper(config, store, vault, cancel.clone())?;
    let actor = tokio::spawn(orchestrator.run());

    let state = handle.force_login().await?;
    cancel.cancel();
    let _ = actor.await;

    match state.status {
        SessionStatus::Connected => {
            println!("Login succeeded; session is active.");
            Ok(())
        }
        _ => bail!(
            "login failed: {}",
            state.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn show_status(store: &StateStore, json: bool) -> Result<()> {
    let state = store.load()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        output::print_state(&state);
    }
    Ok(())
}

fn set_paused(store: &StateStore, paused: bool) -> Result<()> {
    let mut state = store.load()?;
    state.paused = paused;
    store.save(&state)?;
    if paused {
        println!("Automatic checks paused.");
    } else {
        println!("Automatic checks resumed; a running daemon picks this up on its next tick.");
    }
    Ok(())
}

fn set_credentials(
    store: &StateStore,
    vault: &CredentialVault,
    username: Option<String>,
) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => inquire::Text::new("Portal username:")
            .prompt()
            .context("username prompt failed")?,
    };
    let password = inquire::Password::new("Portal password:")
        .without_confirmation()
        .prompt()
        .context("password prompt failed")?;

    let blob = vault.seal(&Credentials { username, password })?;

    let mut state = store.load()?;
    state.encrypted_credentials = Some(blob);
    store.save(&state)?;

    println!("Credentials stored; a running daemon uses them on its next login attempt.");
    Ok(())
}

fn clear_credentials(store: &StateStore) -> Result<()> {
    let mut state = store.load()?;
    state.encrypted_credentials = None;
    store.save(&state)?;
    println!("Credentials removed.");
    Ok(())
}
