//! ViewSync Sync - Change propagation engine
//!
//! Provides:
//! - Path mapping from the source tree into the destination mirror
//! - Copy/delete with a single bounded retry
//! - Per-destination in-flight exclusion
//! - Event routing and watch rebinding on configuration changes
//!
//! ## Modules
//!
//! - [`mapper`] - Pure source-to-destination path mapping
//! - [`file_ops`] - Filesystem adapter and retry policy
//! - [`inflight`] - In-flight destination registry
//! - [`watcher`] - notify-based source tree watcher
//! - [`router`] - Event router tying the above together

pub mod file_ops;
pub mod inflight;
pub mod mapper;
pub mod router;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;
use viewsync_core::ConfigError;

pub use file_ops::{FileOp, FileOpError, FileOperations, LocalFileOps, RetryingFileOps};
pub use inflight::{InFlightGuard, Reservation};
pub use mapper::{has_tracked_extension, PathMapper, Rejection, ANCHOR_SEGMENT};
pub use router::{ChangeRouter, RouterState};
pub use watcher::FileWatcher;

/// Errors that can occur while binding or running the engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// The OS watcher could not be created
    #[error("Failed to create file watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    /// The source root could not be watched
    #[error("Failed to watch '{}': {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The configuration snapshot failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),
}
