//! ViewSync Daemon - Background view mirroring service
//!
//! This binary watches a source tree and mirrors its view files into the
//! destination tree. It handles:
//! - Change propagation through the `viewsync-sync` router
//! - The daily change log and event reporting
//! - Reloading the configuration file when it changes on disk
//! - Pausing and resuming on SIGUSR1
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon publishes the loaded configuration through a `ConfigStore`,
//! then runs the `ChangeRouter` until a `CancellationToken` is triggered on
//! receipt of SIGTERM or SIGINT.

mod reload;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use viewsync_audit::{ChangeLogWriter, TracingListener};
use viewsync_core::{Config, ConfigStore};
use viewsync_sync::{ChangeRouter, RetryingFileOps};

use crate::reload::ConfigReloader;

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "viewsyncd", version, about = "Mirror Razor views into a destination tree")]
struct Cli {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use alternate config file (must be a .json file)
    #[arg(long, value_parser = parse_config_path)]
    config: Option<PathBuf>,

    /// Start with mirroring paused
    #[arg(long)]
    paused: bool,
}

impl Cli {
    /// Tracing level: `-v` flags override the configured level
    fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        match self.verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    }
}

fn parse_config_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Ok(path)
    } else {
        Err(format!("config file must end in .json: {value}"))
    }
}

// ============================================================================
// Startup
// ============================================================================

/// Loads the configuration for this run
///
/// An explicitly given file must exist; the default location falls back to
/// built-in defaults.
fn load_config(cli: &Cli) -> Result<(PathBuf, Config)> {
    match &cli.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            Ok((path.clone(), config))
        }
        None => {
            let path = Config::default_path();
            let config = Config::load_or_default(&path);
            Ok((path, config))
        }
    }
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

// ============================================================================
// DaemonService
// ============================================================================

/// Wires the configuration store, the router and its listeners
struct DaemonService {
    config_path: PathBuf,
    store: ConfigStore,
    router: Arc<ChangeRouter>,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config_path: PathBuf, config: &Config, paused: bool, shutdown: CancellationToken) -> Self {
        let store = ConfigStore::new(config.to_snapshot(paused));

        let router = ChangeRouter::new(store.clone(), RetryingFileOps::default())
            .with_listener(Arc::new(TracingListener::new(store.clone())))
            .with_listener(Arc::new(ChangeLogWriter::new(store.clone())));

        Self {
            config_path,
            store,
            router: Arc::new(router),
            shutdown,
        }
    }

    async fn run(&self) -> Result<()> {
        let _reloader = match ConfigReloader::spawn(
            &self.config_path,
            self.store.clone(),
            self.shutdown.clone(),
        ) {
            Ok(reloader) => Some(reloader),
            Err(e) => {
                warn!(error = %e, "Configuration file will not be reloaded");
                None
            }
        };

        #[cfg(unix)]
        {
            let store = self.store.clone();
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = pause_toggle_loop(store, token).await {
                    warn!(error = %e, "Pause toggling unavailable");
                }
            });
        }

        let snapshot = self.store.current();
        info!(
            source_root = %snapshot.source_root.display(),
            dest_root = %snapshot.dest_root.display(),
            paused = snapshot.paused,
            "Starting change router"
        );

        Arc::clone(&self.router)
            .run(self.shutdown.clone())
            .await
            .context("Change router stopped")
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

/// Flips the pause flag on every SIGUSR1 until shutdown
#[cfg(unix)]
async fn pause_toggle_loop(store: ConfigStore, token: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 =
        signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = usr1.recv() => {
                if received.is_none() {
                    break;
                }
                let paused = store.toggle_paused();
                info!(paused, "Received SIGUSR1, toggled pause");
            }
        }
    }
    Ok(())
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(&cli);

    let configured_level = match &loaded {
        Ok((_, config)) => config.logging.level.clone(),
        Err(_) => "info".to_string(),
    };
    init_tracing(cli.log_level(&configured_level));

    info!("ViewSync daemon starting (viewsyncd)");

    let (config_path, config) = loaded?;
    info!(config_path = %config_path.display(), "Loaded configuration");

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, "{}", problem.message);
        }
        anyhow::bail!("Invalid configuration in {}", config_path.display());
    }

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config_path, &config, cli.paused, shutdown_token);
    let result = service.run().await;

    match &result {
        Ok(()) => info!("ViewSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "ViewSync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
