//! Configuration snapshot store
//!
//! [`ConfigStore`] owns the current [`WatchConfig`] and replaces it
//! atomically. Consumers never see a half-updated configuration: they hold
//! an `Arc<WatchConfig>` obtained in one step, and learn about replacements
//! through a `tokio::sync::watch` receiver.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::WatchConfig;

/// Publishes immutable configuration snapshots
///
/// Cloning the store yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    tx: Arc<watch::Sender<Arc<WatchConfig>>>,
}

impl ConfigStore {
    /// Creates a store holding `initial` as its first snapshot
    pub fn new(initial: WatchConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current snapshot
    pub fn current(&self) -> Arc<WatchConfig> {
        Arc::clone(&self.tx.borrow())
    }

    /// Subscribes to snapshot replacements
    ///
    /// The returned receiver starts with the current snapshot marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Arc<WatchConfig>> {
        self.tx.subscribe()
    }

    /// Replaces the snapshot, notifying subscribers if it differs
    ///
    /// Returns true when a new snapshot was published.
    pub fn replace(&self, next: WatchConfig) -> bool {
        self.tx.send_if_modified(|current| {
            if **current == next {
                return false;
            }
            *current = Arc::new(next);
            true
        })
    }

    /// Derives a new snapshot from the current one and publishes it
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&WatchConfig) -> WatchConfig,
    {
        let next = f(&self.current());
        self.replace(next)
    }

    /// Sets the pause flag
    pub fn set_paused(&self, paused: bool) -> bool {
        self.update(|c| c.with_paused(paused))
    }

    /// Flips the pause flag and returns the new value
    ///
    /// The read and the write happen under the channel lock, so concurrent
    /// toggles never collapse into one.
    pub fn toggle_paused(&self) -> bool {
        let mut paused = false;
        self.tx.send_modify(|current| {
            paused = !current.paused;
            *current = Arc::new(current.with_paused(paused));
        });
        paused
    }
}
