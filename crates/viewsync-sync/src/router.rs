//! Change router
//!
//! The [`ChangeRouter`] turns raw notifications into mirror operations and
//! reports every outcome as a [`ChangeEvent`].
//!
//! ## Event flow
//!
//! ```text
//! RawEvent ──→ paused? ──→ PathMapper ──→ InFlightGuard::reserve
//!                 │             │                  │
//!              discard    mapping error      already held: drop
//!                                                  │
//!                                                  ▼
//!                                  RetryingFileOps ──→ ChangeEvent ──→ listeners
//! ```
//!
//! ## Reconfiguration
//!
//! [`ChangeRouter::run`] follows the [`ConfigStore`]. When the source root
//! or tracked extension changes, the new roots are validated first; only
//! then is the old watch disposed and a new one armed. A failed validation
//! leaves the previous watch in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use viewsync_core::{
    ChangeEvent, ChangeKind, ConfigField, ConfigStore, IChangeListener, RawEvent, RawEventKind,
    WatchConfig,
};

use crate::file_ops::RetryingFileOps;
use crate::inflight::InFlightGuard;
use crate::mapper::{has_tracked_extension, PathMapper};
use crate::watcher::FileWatcher;
use crate::SyncError;

/// Binding state of the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// A watch is armed (or none was ever requested)
    Active,
    /// Swapping the watch for a new source root
    Rebinding,
}

/// Routes raw filesystem events to mirror operations
pub struct ChangeRouter {
    store: ConfigStore,
    ops: RetryingFileOps,
    in_flight: Arc<InFlightGuard>,
    listeners: Vec<Arc<dyn IChangeListener>>,
    state: Mutex<RouterState>,
}

impl std::fmt::Debug for ChangeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRouter")
            .field("listeners", &self.listeners.len())
            .field("in_flight", &self.in_flight.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ChangeRouter {
    pub fn new(store: ConfigStore, ops: RetryingFileOps) -> Self {
        Self {
            store,
            ops,
            in_flight: Arc::new(InFlightGuard::new()),
            listeners: Vec::new(),
            state: Mutex::new(RouterState::Active),
        }
    }

    /// Registers a listener; listeners are called in registration order
    pub fn add_listener(&mut self, listener: Arc<dyn IChangeListener>) {
        self.listeners.push(listener);
    }

    pub fn with_listener(mut self, listener: Arc<dyn IChangeListener>) -> Self {
        self.add_listener(listener);
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn in_flight(&self) -> &Arc<InFlightGuard> {
        &self.in_flight
    }

    pub fn state(&self) -> RouterState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RouterState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Delivers `event` to every listener and returns it
    ///
    /// A failing listener is logged and skipped.
    fn emit(&self, event: ChangeEvent) -> ChangeEvent {
        for listener in &self.listeners {
            if let Err(e) = listener.on_change(&event) {
                warn!(error = %e, title = %event.title, "Change listener failed");
            }
        }
        event
    }

    // ========================================================================
    // Event processing
    // ========================================================================

    /// Spawns [`process`](Self::process) for `raw` on the current runtime
    pub fn dispatch(self: &Arc<Self>, raw: RawEvent) -> JoinHandle<Option<ChangeEvent>> {
        let router = Arc::clone(self);
        tokio::spawn(async move { router.process(raw).await })
    }

    /// Handles one raw event against the current snapshot
    ///
    /// Returns the emitted event, or `None` when the event was discarded
    /// (paused, duplicate in flight, or untracked on both sides of a rename).
    pub async fn process(&self, raw: RawEvent) -> Option<ChangeEvent> {
        let config = self.store.current();
        if config.paused {
            debug!(path = %raw.source_path.display(), "Paused, discarding event");
            return None;
        }

        let mapper = PathMapper::from_config(&config);
        match raw.kind {
            RawEventKind::Error(message) => {
                error!(error = %message, "Watch error");
                Some(self.emit(ChangeEvent::error(message)))
            }
            RawEventKind::Created => {
                self.mirror_copy(ChangeKind::Created, &raw.source_path, &mapper, &config)
                    .await
            }
            RawEventKind::Changed => {
                self.mirror_copy(ChangeKind::Changed, &raw.source_path, &mapper, &config)
                    .await
            }
            RawEventKind::Deleted => {
                self.mirror_delete(&raw.source_path, &mapper, &config).await
            }
            RawEventKind::Renamed => match raw.old_source_path {
                Some(old) => {
                    self.mirror_rename(&old, &raw.source_path, &mapper, &config)
                        .await
                }
                None => {
                    self.mirror_copy(ChangeKind::Changed, &raw.source_path, &mapper, &config)
                        .await
                }
            },
        }
    }

    /// Maps `source`, or builds the mapping error event
    fn map_source(&self, mapper: &PathMapper, source: &Path) -> Result<PathBuf, ChangeEvent> {
        mapper.classify(source).map_err(|rejection| {
            debug!(path = %source.display(), ?rejection, "Path not mapped");
            ChangeEvent::error(format!(
                "Failed to map path: '{}' -> {}",
                source.display(),
                mapper.dest_root().display()
            ))
        })
    }

    async fn mirror_copy(
        &self,
        kind: ChangeKind,
        source: &Path,
        mapper: &PathMapper,
        config: &WatchConfig,
    ) -> Option<ChangeEvent> {
        let dest = match self.map_source(mapper, source) {
            Ok(dest) => dest,
            Err(event) => return Some(self.emit(event)),
        };

        let Some(_reservation) = self.in_flight.reserve(&dest) else {
            debug!(dest = %dest.display(), "Destination in flight, dropping event");
            return None;
        };

        let event = match self.ops.copy(source, &dest, config.retry_delay).await {
            Ok(()) => {
                info!(kind = %kind, source = %source.display(), dest = %dest.display(), "Mirrored");
                ChangeEvent::for_path(kind, &dest)
            }
            Err(e) => {
                error!(source = %source.display(), error = %e, "Copy failed");
                ChangeEvent::error(e.to_string())
            }
        };
        Some(self.emit(event))
    }

    async fn mirror_delete(
        &self,
        source: &Path,
        mapper: &PathMapper,
        config: &WatchConfig,
    ) -> Option<ChangeEvent> {
        let dest = match self.map_source(mapper, source) {
            Ok(dest) => dest,
            Err(event) => return Some(self.emit(event)),
        };

        if !dest_exists(&dest).await {
            debug!(dest = %dest.display(), "Mirror already absent");
            return Some(self.emit(ChangeEvent::for_path(ChangeKind::Deleted, &dest)));
        }

        let Some(_reservation) = self.in_flight.reserve(&dest) else {
            debug!(dest = %dest.display(), "Destination in flight, dropping event");
            return None;
        };

        let event = match self.ops.delete(&dest, config.retry_delay).await {
            Ok(()) => {
                info!(dest = %dest.display(), "Mirror deleted");
                ChangeEvent::for_path(ChangeKind::Deleted, &dest)
            }
            Err(e) => {
                error!(dest = %dest.display(), error = %e, "Delete failed");
                ChangeEvent::error(e.to_string())
            }
        };
        Some(self.emit(event))
    }

    async fn mirror_rename(
        &self,
        old: &Path,
        new: &Path,
        mapper: &PathMapper,
        config: &WatchConfig,
    ) -> Option<ChangeEvent> {
        let old_tracked = has_tracked_extension(old, &config.extension);

        if !has_tracked_extension(new, &config.extension) {
            if old_tracked {
                debug!(old = %old.display(), new = %new.display(), "Renamed out of tracked type");
                return self.mirror_delete(old, mapper, config).await;
            }
            return None;
        }

        let new_dest = match self.map_source(mapper, new) {
            Ok(dest) => dest,
            Err(event) => return Some(self.emit(event)),
        };

        let Some(_reservation) = self.in_flight.reserve(&new_dest) else {
            debug!(dest = %new_dest.display(), "Destination in flight, dropping event");
            return None;
        };

        if let Err(e) = self.ops.copy(new, &new_dest, config.retry_delay).await {
            error!(source = %new.display(), error = %e, "Copy failed during rename");
            return Some(self.emit(ChangeEvent::error(e.to_string())));
        }

        let old_dest = if old_tracked { mapper.map(old) } else { None };
        let event = match old_dest {
            Some(old_dest) => {
                if old_dest != new_dest && dest_exists(&old_dest).await {
                    if let Err(e) = self.ops.delete(&old_dest, config.retry_delay).await {
                        error!(dest = %old_dest.display(), error = %e, "Delete failed during rename");
                        return Some(self.emit(ChangeEvent::error(e.to_string())));
                    }
                }
                info!(old = %old_dest.display(), new = %new_dest.display(), "Mirror renamed");
                ChangeEvent::renamed(&old_dest, &new_dest)
            }
            None => {
                info!(dest = %new_dest.display(), "Mirrored renamed file");
                ChangeEvent::for_path(ChangeKind::Changed, &new_dest)
            }
        };
        Some(self.emit(event))
    }

    // ========================================================================
    // Binding and reconfiguration
    // ========================================================================

    /// Validates `config`'s roots and arms a watch on its source root
    ///
    /// Events are dispatched onto `runtime`, one task each.
    pub fn bind(
        self: &Arc<Self>,
        config: &WatchConfig,
        runtime: Handle,
    ) -> Result<FileWatcher, SyncError> {
        config.validate_roots()?;
        self.arm(&config.source_root, &config.extension, runtime)
    }

    fn arm(
        self: &Arc<Self>,
        root: &Path,
        extension: &str,
        runtime: Handle,
    ) -> Result<FileWatcher, SyncError> {
        let router = Arc::clone(self);
        FileWatcher::start(root, extension, runtime, move |raw| {
            let router = Arc::clone(&router);
            async move {
                router.process(raw).await;
            }
        })
    }

    /// Swaps `watcher` for a watch matching `next`
    ///
    /// Validation failures leave `watcher` untouched. If arming the new
    /// watch fails after the old one was disposed, the old root is re-armed.
    fn rebind(
        self: &Arc<Self>,
        watcher: &mut Option<FileWatcher>,
        next: &WatchConfig,
        runtime: &Handle,
    ) -> Result<(), SyncError> {
        self.set_state(RouterState::Rebinding);
        let result = self.swap_watch(watcher, next, runtime);
        self.set_state(RouterState::Active);

        if let Err(e) = &result {
            error!(error = %e, "Rebinding failed");
            self.emit(ChangeEvent::error(e.to_string()));
        }
        result
    }

    fn swap_watch(
        self: &Arc<Self>,
        watcher: &mut Option<FileWatcher>,
        next: &WatchConfig,
        runtime: &Handle,
    ) -> Result<(), SyncError> {
        next.validate_roots()?;

        let previous = watcher
            .take()
            .map(|w| (w.root().to_path_buf(), w.extension().to_string()));

        match self.arm(&next.source_root, &next.extension, runtime.clone()) {
            Ok(armed) => {
                *watcher = Some(armed);
                Ok(())
            }
            Err(e) => {
                if let Some((root, extension)) = previous {
                    match self.arm(&root, &extension, runtime.clone()) {
                        Ok(restored) => *watcher = Some(restored),
                        Err(restore) => {
                            error!(path = %root.display(), error = %restore, "Cannot restore previous watch")
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Applies one snapshot replacement
    fn reconfigure(
        self: &Arc<Self>,
        watcher: &mut Option<FileWatcher>,
        previous: &WatchConfig,
        next: &WatchConfig,
        runtime: &Handle,
    ) -> Result<(), SyncError> {
        let fields = next.changed_fields(previous);
        debug!(?fields, "Configuration replaced");

        if fields.contains(&ConfigField::Paused) {
            info!(paused = next.paused, "Pause state changed");
        }

        let needs_rebind = match watcher {
            Some(w) => w.root() != next.source_root || w.extension() != next.extension,
            None => true,
        };

        if needs_rebind {
            info!(
                source_root = %next.source_root.display(),
                extension = %next.extension,
                "Rebinding watch"
            );
            return self.rebind(watcher, next, runtime);
        }

        if fields.contains(&ConfigField::DestRoot) {
            if let Err(e) = next.validate_dest_root() {
                error!(error = %e, "Destination root invalid");
                self.emit(ChangeEvent::error(e.to_string()));
                return Err(e.into());
            }
            info!(dest_root = %next.dest_root.display(), "Destination root changed");
        }
        Ok(())
    }

    /// Arms the initial watch and follows configuration changes until shutdown
    ///
    /// # Errors
    /// Returns the initial binding error, after emitting it as an event.
    /// Later reconfiguration failures are emitted and logged, and the router
    /// keeps running.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), SyncError> {
        let runtime = Handle::current();
        let mut rx = self.store.subscribe();
        let mut current = Arc::clone(&rx.borrow_and_update());

        let mut watcher = match self.bind(&current, runtime.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                error!(error = %e, "Initial binding failed");
                self.emit(ChangeEvent::error(e.to_string()));
                return Err(e);
            }
        };
        info!("Change router active");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping watch");
                    break;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        debug!("Configuration store closed");
                        break;
                    }
                    let next = Arc::clone(&rx.borrow_and_update());
                    // Failures are already reported; the next snapshot retries.
                    let _ = self.reconfigure(&mut watcher, &current, &next, &runtime);
                    current = next;
                }
            }
        }

        drop(watcher);
        Ok(())
    }
}

async fn dest_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
