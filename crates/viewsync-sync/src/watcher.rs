//! Filesystem watching
//!
//! Provides a [`FileWatcher`] that wraps the `notify` crate to monitor the
//! source tree, converting raw OS events into [`RawEvent`] values.
//!
//! The notify callback runs on notify's own thread and must never block:
//! each tracked event is handed to the event handler, whose future is spawned
//! onto the tokio runtime captured when the watch was armed.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  FileWatcher ──→ rename pairing ──→ extension filter ──→ Handle::spawn(handler(raw)) ──→ ChangeRouter
//! ```
//!
//! ## Rename halves
//!
//! inotify reports a move as a `From` half on the vacated path and a `To`
//! half on the new one, sharing a tracker cookie. A `From` is held for
//! [`RENAME_PAIR_WINDOW`]:
//!
//! - `To` with a matching tracker → `Renamed(old, new)`
//! - `To` with nothing pending → `Created` (moved into the tree)
//! - `From` still pending when the window closes → `Deleted` (moved out)
//!
//! Moving a whole directory reports only the directory itself; the files
//! inside are not expanded.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::event::{Flag, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use viewsync_core::RawEvent;

use crate::mapper::has_tracked_extension;
use crate::SyncError;

/// How long a `From` half waits for its `To` half
pub const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(250);

const OVERFLOW_MESSAGE: &str = "event queue overflowed; changes may have been missed";

// ============================================================================
// FileWatcher
// ============================================================================

/// An armed recursive watch on one source root
///
/// Dropping the watcher disposes the subscription; no further events are
/// delivered after that.
pub struct FileWatcher {
    /// Kept alive for as long as the watch should stay armed
    _watcher: RecommendedWatcher,
    root: PathBuf,
    extension: String,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Arms a recursive watch on `root`
    ///
    /// Events whose paths don't carry `extension` are dropped in the callback.
    /// Watch primitive errors and queue overflows are delivered as
    /// [`RawEvent::error`]. Every delivered event becomes one task on
    /// `runtime`.
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or `root` cannot
    /// be watched (missing, permissions, inotify watch limit)
    pub fn start<F, Fut>(
        root: &Path,
        extension: &str,
        runtime: Handle,
        handler: F,
    ) -> Result<Self, SyncError>
    where
        F: Fn(RawEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let dispatch = Arc::new(Dispatch {
            handler,
            runtime,
            extension: extension.to_string(),
            renames: Mutex::new(RenamePairing::default()),
        });

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => dispatch.on_event(&event),
                Err(err) => {
                    error!(error = %err, "File watcher error");
                    dispatch.deliver(RawEvent::error(err.to_string()));
                }
            },
            notify::Config::default(),
        )
        .map_err(SyncError::WatcherInit)?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| SyncError::Watch {
                path: root.to_path_buf(),
                source,
            })?;

        info!(path = %root.display(), extension, "Watching source tree");

        Ok(Self {
            _watcher: watcher,
            root: root.to_path_buf(),
            extension: extension.to_string(),
        })
    }

    /// Returns the watched source root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the tracked extension this watch filters on
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        info!(path = %self.root.display(), "Watch disposed");
    }
}

// ============================================================================
// Dispatch - callback state shared with pairing timers
// ============================================================================

struct Dispatch<F> {
    handler: F,
    runtime: Handle,
    extension: String,
    renames: Mutex<RenamePairing>,
}

impl<F, Fut> Dispatch<F>
where
    F: Fn(RawEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn pairing(&self) -> std::sync::MutexGuard<'_, RenamePairing> {
        self.renames.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_event(self: &Arc<Self>, event: &notify::Event) {
        match map_notify_event(event) {
            Mapped::Event(raw) => self.deliver(raw),
            Mapped::RenameFrom { tracker, path } => {
                let displaced = self.pairing().vacate(tracker, path.clone());
                if let Some(raw) = displaced {
                    self.deliver(raw);
                }
                self.expire_later(tracker, path);
            }
            Mapped::RenameTo { tracker, path } => {
                let raw = self.pairing().arrive(tracker, path);
                self.deliver(raw);
            }
            Mapped::RenamePair { tracker, old, new } => {
                if self.pairing().already_paired(tracker) {
                    debug!(new = %new.display(), "Rename already resolved from its halves");
                } else {
                    self.deliver(RawEvent::renamed(old, new));
                }
            }
            Mapped::Ignored => {}
        }
    }

    /// Reports `path` as moved out unless its `To` half shows up in time
    fn expire_later(self: &Arc<Self>, tracker: Option<usize>, path: PathBuf) {
        let dispatch = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(RENAME_PAIR_WINDOW).await;
            let expired = dispatch.pairing().expire(tracker, &path);
            if let Some(raw) = expired {
                debug!(path = %path.display(), "Rename without destination, treating as Deleted");
                dispatch.deliver(raw);
            }
        });
    }

    fn deliver(&self, raw: RawEvent) {
        if is_tracked(&raw, &self.extension) {
            self.runtime.spawn((self.handler)(raw));
        } else {
            debug!(path = %raw.source_path.display(), "Ignoring untracked file");
        }
    }
}

/// Returns true if the event concerns a tracked file
///
/// Renames pass when either side is tracked, so a file renamed out of the
/// tracked type still reaches the router. Errors always pass.
fn is_tracked(raw: &RawEvent, extension: &str) -> bool {
    if matches!(raw.kind, viewsync_core::RawEventKind::Error(_)) {
        return true;
    }
    has_tracked_extension(&raw.source_path, extension)
        || raw
            .old_source_path
            .as_deref()
            .map(|old| has_tracked_extension(old, extension))
            .unwrap_or(false)
}

// ============================================================================
// RenamePairing
// ============================================================================

/// Matches `From` and `To` rename halves by tracker
///
/// Halves without a tracker pair with each other in arrival order.
#[derive(Debug, Default)]
struct RenamePairing {
    pending: HashMap<Option<usize>, PathBuf>,
    /// Trackers resolved from their halves whose `Both` event is still due
    paired: HashSet<usize>,
}

impl RenamePairing {
    /// Holds a vacated path; returns a `Deleted` for any path it displaces
    fn vacate(&mut self, tracker: Option<usize>, path: PathBuf) -> Option<RawEvent> {
        self.pending.insert(tracker, path).map(RawEvent::deleted)
    }

    /// Resolves the arrival side of a move
    fn arrive(&mut self, tracker: Option<usize>, path: PathBuf) -> RawEvent {
        match self.pending.remove(&tracker) {
            Some(old) => {
                if let Some(t) = tracker {
                    self.paired.insert(t);
                }
                debug!(old = %old.display(), new = %path.display(), "Paired rename halves");
                RawEvent::renamed(old, path)
            }
            None => {
                debug!(path = %path.display(), "Rename without origin, treating as Created");
                RawEvent::created(path)
            }
        }
    }

    /// Returns true if a `Both` event repeats a pair already delivered
    fn already_paired(&mut self, tracker: Option<usize>) -> bool {
        tracker.map(|t| self.paired.remove(&t)).unwrap_or(false)
    }

    /// Releases `path` as `Deleted` if it is still waiting for its `To` half
    fn expire(&mut self, tracker: Option<usize>, path: &Path) -> Option<RawEvent> {
        if self.pending.get(&tracker).map(|p| p == path).unwrap_or(false) {
            self.pending.remove(&tracker);
            Some(RawEvent::deleted(path))
        } else {
            None
        }
    }
}

// ============================================================================
// Event mapping - notify::Event → RawEvent
// ============================================================================

/// Outcome of mapping one `notify::Event`
#[derive(Debug, PartialEq)]
enum Mapped {
    Event(RawEvent),
    RenameFrom { tracker: Option<usize>, path: PathBuf },
    RenameTo { tracker: Option<usize>, path: PathBuf },
    RenamePair { tracker: Option<usize>, old: PathBuf, new: PathBuf },
    Ignored,
}

/// Converts a `notify::Event`
///
/// Maps the notify event kinds as follows:
/// - any event flagged `Rescan` -> `Error` (the kernel queue overflowed)
/// - `Create(*)` -> `Created`
/// - `Modify(Data(*))` -> `Changed`
/// - `Modify(Name(Both))` with 2 paths -> rename pair
/// - `Modify(Name(From | To))` -> rename halves, resolved by [`RenamePairing`]
/// - `Modify(Name(Any | Other))` -> `Changed` if the path exists, else `Deleted`
/// - `Remove(*)` -> `Deleted`
/// - Other `Modify(*)` -> `Changed`
///
/// Events without paths and access events are ignored.
fn map_notify_event(event: &notify::Event) -> Mapped {
    if event.flag() == Some(Flag::Rescan) {
        warn!(kind = ?event.kind, "Watch queue overflowed");
        return Mapped::Event(RawEvent::error(OVERFLOW_MESSAGE));
    }

    let paths = &event.paths;
    let first = match paths.first() {
        Some(path) => path.clone(),
        None => {
            debug!(kind = ?event.kind, "Ignoring event without paths");
            return Mapped::Ignored;
        }
    };
    let tracker = event.tracker();

    match &event.kind {
        EventKind::Create(_) => {
            debug!(path = %first.display(), "Mapped Create event");
            Mapped::Event(RawEvent::created(first))
        }

        EventKind::Modify(ModifyKind::Data(_)) => {
            debug!(path = %first.display(), "Mapped Modify(Data) event");
            Mapped::Event(RawEvent::changed(first))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.get(1) {
            Some(new) => {
                debug!(old = %first.display(), new = %new.display(), "Mapped Rename event");
                Mapped::RenamePair {
                    tracker,
                    old: first,
                    new: new.clone(),
                }
            }
            None => {
                debug!(path = %first.display(), "Rename with single path, treating as Changed");
                Mapped::Event(RawEvent::changed(first))
            }
        },

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Mapped::RenameFrom {
            tracker,
            path: first,
        },

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Mapped::RenameTo {
            tracker,
            path: first,
        },

        EventKind::Modify(ModifyKind::Name(_)) => {
            debug!(path = %first.display(), "Rename without pairing, checking path");
            if first.exists() {
                Mapped::Event(RawEvent::changed(first))
            } else {
                Mapped::Event(RawEvent::deleted(first))
            }
        }

        EventKind::Remove(_) => {
            debug!(path = %first.display(), "Mapped Remove event");
            Mapped::Event(RawEvent::deleted(first))
        }

        EventKind::Modify(_) => {
            debug!(path = %first.display(), kind = ?event.kind, "Mapped other Modify event");
            Mapped::Event(RawEvent::changed(first))
        }

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            Mapped::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use viewsync_core::RawEventKind;

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        notify::Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    fn mapped_raw(event: &notify::Event) -> RawEvent {
        match map_notify_event(event) {
            Mapped::Event(raw) => raw,
            other => panic!("expected a plain event, got {other:?}"),
        }
    }

    #[test]
    fn test_map_create_event() {
        let raw = mapped_raw(&event(
            EventKind::Create(notify::event::CreateKind::File),
            &["/src/Views/a.cshtml"],
        ));
        assert_eq!(raw.kind, RawEventKind::Created);
        assert_eq!(raw.source_path, PathBuf::from("/src/Views/a.cshtml"));
        assert!(raw.old_source_path.is_none());
    }

    #[test]
    fn test_map_modify_data_event() {
        let raw = mapped_raw(&event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            &["/a.cshtml"],
        ));
        assert_eq!(raw.kind, RawEventKind::Changed);
    }

    #[test]
    fn test_map_rename_event() {
        let mapped = map_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/old.cshtml", "/new.cshtml"],
        ));
        assert_eq!(
            mapped,
            Mapped::RenamePair {
                tracker: None,
                old: PathBuf::from("/old.cshtml"),
                new: PathBuf::from("/new.cshtml"),
            }
        );
    }

    #[test]
    fn test_map_rename_single_path_fallback() {
        let raw = mapped_raw(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/only.cshtml"],
        ));
        assert_eq!(raw.kind, RawEventKind::Changed);
    }

    #[test]
    fn test_map_rename_halves_carry_tracker() {
        let from = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/src/Views/a.cshtml"))
            .set_tracker(7);
        let to = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/src/Views/b.cshtml"))
            .set_tracker(7);

        assert_eq!(
            map_notify_event(&from),
            Mapped::RenameFrom {
                tracker: Some(7),
                path: PathBuf::from("/src/Views/a.cshtml"),
            }
        );
        assert_eq!(
            map_notify_event(&to),
            Mapped::RenameTo {
                tracker: Some(7),
                path: PathBuf::from("/src/Views/b.cshtml"),
            }
        );
    }

    #[test]
    fn test_map_unpaired_rename_of_missing_path_is_delete() {
        let raw = mapped_raw(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &["/definitely/not/here/a.cshtml"],
        ));
        assert_eq!(raw.kind, RawEventKind::Deleted);
    }

    #[test]
    fn test_map_remove_event() {
        let raw = mapped_raw(&event(
            EventKind::Remove(notify::event::RemoveKind::File),
            &["/a.cshtml"],
        ));
        assert_eq!(raw.kind, RawEventKind::Deleted);
    }

    #[test]
    fn test_map_other_modify_event() {
        let raw = mapped_raw(&event(
            EventKind::Modify(ModifyKind::Metadata(
                notify::event::MetadataKind::WriteTime,
            )),
            &["/a.cshtml"],
        ));
        assert_eq!(raw.kind, RawEventKind::Changed);
    }

    #[test]
    fn test_map_access_event_ignored() {
        let mapped = map_notify_event(&event(
            EventKind::Access(notify::event::AccessKind::Read),
            &["/a.cshtml"],
        ));
        assert_eq!(mapped, Mapped::Ignored);
    }

    #[test]
    fn test_map_rescan_flag_is_overflow_error() {
        let overflow = notify::Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let raw = mapped_raw(&overflow);
        assert_eq!(raw.kind, RawEventKind::Error(OVERFLOW_MESSAGE.to_string()));
        assert!(is_tracked(&raw, "cshtml"));
    }

    #[test]
    fn test_map_event_no_paths() {
        let mapped = map_notify_event(&event(
            EventKind::Create(notify::event::CreateKind::File),
            &[],
        ));
        assert_eq!(mapped, Mapped::Ignored);
    }

    #[test]
    fn test_pairing_matches_halves_by_tracker() {
        let mut pairing = RenamePairing::default();
        assert!(pairing.vacate(Some(1), PathBuf::from("/v/a.cshtml")).is_none());
        assert!(pairing.vacate(Some(2), PathBuf::from("/v/x.cshtml")).is_none());

        let raw = pairing.arrive(Some(1), PathBuf::from("/v/b.cshtml"));
        assert_eq!(raw.kind, RawEventKind::Renamed);
        assert_eq!(raw.old_source_path, Some(PathBuf::from("/v/a.cshtml")));
        assert_eq!(raw.source_path, PathBuf::from("/v/b.cshtml"));

        // inotify follows the halves with a Both event for the same cookie
        assert!(pairing.already_paired(Some(1)));
        assert!(!pairing.already_paired(Some(1)));
        assert!(!pairing.already_paired(None));

        assert!(pairing.expire(Some(1), Path::new("/v/a.cshtml")).is_none());
        let gone = pairing.expire(Some(2), Path::new("/v/x.cshtml")).unwrap();
        assert_eq!(gone.kind, RawEventKind::Deleted);
        assert_eq!(gone.source_path, PathBuf::from("/v/x.cshtml"));
    }

    #[test]
    fn test_pairing_arrival_without_origin_is_created() {
        let mut pairing = RenamePairing::default();
        let raw = pairing.arrive(Some(9), PathBuf::from("/v/moved-in.cshtml"));
        assert_eq!(raw.kind, RawEventKind::Created);
        assert!(!pairing.already_paired(Some(9)));
    }

    #[test]
    fn test_pairing_displaced_origin_is_deleted() {
        let mut pairing = RenamePairing::default();
        pairing.vacate(None, PathBuf::from("/v/first.cshtml"));
        let displaced = pairing
            .vacate(None, PathBuf::from("/v/second.cshtml"))
            .unwrap();
        assert_eq!(displaced.kind, RawEventKind::Deleted);
        assert_eq!(displaced.source_path, PathBuf::from("/v/first.cshtml"));
        // a stale timer for the displaced path finds nothing to release
        assert!(pairing.expire(None, Path::new("/v/first.cshtml")).is_none());
    }

    #[test]
    fn test_filter_by_extension() {
        assert!(is_tracked(&RawEvent::created("/a/Index.cshtml"), "cshtml"));
        assert!(!is_tracked(&RawEvent::created("/a/site.css"), "cshtml"));
        assert!(is_tracked(&RawEvent::error("queue overflow"), "cshtml"));
    }

    #[test]
    fn test_filter_passes_rename_with_either_side_tracked() {
        assert!(is_tracked(
            &RawEvent::renamed("/a/.Index.tmp", "/a/Index.cshtml"),
            "cshtml"
        ));
        assert!(is_tracked(
            &RawEvent::renamed("/a/Index.cshtml", "/a/Index.bak"),
            "cshtml"
        ));
        assert!(!is_tracked(&RawEvent::renamed("/a/x.txt", "/a/y.txt"), "cshtml"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimed_rename_origin_delivers_delete() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let dispatch = Arc::new(Dispatch {
            handler: move |raw: RawEvent| {
                let sink = Arc::clone(&sink);
                async move { sink.lock().unwrap().push(raw) }
            },
            runtime: Handle::current(),
            extension: "cshtml".to_string(),
            renames: Mutex::new(RenamePairing::default()),
        });

        let from = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/src/Views/gone.cshtml"))
            .set_tracker(3);
        dispatch.on_event(&from);
        tokio::time::sleep(RENAME_PAIR_WINDOW / 2).await;
        assert!(delivered.lock().unwrap().is_empty());

        tokio::time::sleep(RENAME_PAIR_WINDOW).await;
        tokio::task::yield_now().await;
        let events = delivered.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RawEventKind::Deleted);
        assert_eq!(events[0].source_path, PathBuf::from("/src/Views/gone.cshtml"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paired_halves_deliver_one_rename() {
        let count = Arc::new(AtomicUsize::new(0));
        let renames = Arc::new(AtomicUsize::new(0));
        let (c, r) = (Arc::clone(&count), Arc::clone(&renames));
        let dispatch = Arc::new(Dispatch {
            handler: move |raw: RawEvent| {
                c.fetch_add(1, Ordering::SeqCst);
                if raw.kind == RawEventKind::Renamed {
                    r.fetch_add(1, Ordering::SeqCst);
                }
                async {}
            },
            runtime: Handle::current(),
            extension: "cshtml".to_string(),
            renames: Mutex::new(RenamePairing::default()),
        });

        let kind = |mode| EventKind::Modify(ModifyKind::Name(mode));
        dispatch.on_event(
            &notify::Event::new(kind(RenameMode::From))
                .add_path(PathBuf::from("/src/Views/a.cshtml"))
                .set_tracker(5),
        );
        dispatch.on_event(
            &notify::Event::new(kind(RenameMode::To))
                .add_path(PathBuf::from("/src/Views/b.cshtml"))
                .set_tracker(5),
        );
        dispatch.on_event(
            &notify::Event::new(kind(RenameMode::Both))
                .add_path(PathBuf::from("/src/Views/a.cshtml"))
                .add_path(PathBuf::from("/src/Views/b.cshtml"))
                .set_tracker(5),
        );

        tokio::time::sleep(RENAME_PAIR_WINDOW * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(renames.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_on_missing_root_fails() {
        let result = FileWatcher::start(
            Path::new("/definitely/not/here"),
            "cshtml",
            Handle::current(),
            |_raw| async {},
        );
        assert!(matches!(result, Err(SyncError::Watch { .. })));
    }

    #[tokio::test]
    async fn test_start_records_root_and_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let watcher =
            FileWatcher::start(dir.path(), "cshtml", Handle::current(), |_raw| async {})
                .unwrap();
        assert_eq!(watcher.root(), dir.path());
        assert_eq!(watcher.extension(), "cshtml");
    }
}
