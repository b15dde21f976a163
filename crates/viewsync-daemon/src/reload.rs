//! Configuration file reloading
//!
//! Watches the folder holding the configuration file and republishes the
//! snapshot whenever the file is written. The pause flag is runtime-only
//! and carries over from the snapshot being replaced.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use viewsync_core::{Config, ConfigStore};

/// Writes arriving within this window are applied as one reload.
const SETTLE: Duration = Duration::from_millis(150);

/// Keeps the configuration file watch alive
pub struct ConfigReloader {
    _watcher: RecommendedWatcher,
}

impl ConfigReloader {
    /// Starts watching `path` and spawns the reload task
    pub fn spawn(path: &Path, store: ConfigStore, shutdown: CancellationToken) -> Result<Self> {
        let path = path.to_path_buf();
        let dir = watch_dir(&path);
        let file_name = path.file_name().map(|n| n.to_os_string());
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    let is_write = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
                    if touches_config && is_write {
                        let _ = tx.send(());
                    }
                }
                Err(err) => warn!(error = %err, "Config watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create config watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config folder: {}", dir.display()))?;

        let reload_path = path.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    signal = rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        tokio::time::sleep(SETTLE).await;
                        while rx.try_recv().is_ok() {}
                        if let Err(e) = reload_into(&reload_path, &store) {
                            warn!(error = %e, "Configuration reload skipped");
                        }
                    }
                }
            }
            debug!("Config reload task stopped");
        });

        info!(path = %path.display(), "Watching configuration file");
        Ok(Self { _watcher: watcher })
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Loads `path` and publishes it, keeping the current pause flag
///
/// Validation problems are logged but don't block the reload; the router
/// reports unusable roots itself. Returns true if a new snapshot was
/// published.
pub fn reload_into(path: &Path, store: &ConfigStore) -> Result<bool> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to reload {}", path.display()))?;

    for problem in config.validate() {
        warn!(field = %problem.field, "{}", problem.message);
    }

    let published = store.update(|current| config.to_snapshot(current.paused));
    if published {
        info!(path = %path.display(), "Configuration reloaded");
    }
    Ok(published)
}
