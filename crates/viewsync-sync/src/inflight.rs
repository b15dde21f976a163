//! In-flight destination registry
//!
//! At most one copy/delete runs per destination path. [`InFlightGuard`]
//! holds the set of paths with work in progress; the check-and-insert in
//! [`InFlightGuard::acquire`] happens under a single lock, so of two events
//! racing for the same destination exactly one acquires it. The loser is
//! dropped, not queued.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Registry of destination paths with an operation in progress
#[derive(Debug, Default)]
pub struct InFlightGuard {
    paths: Mutex<HashSet<PathBuf>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    // The set stays consistent even if a holder panicked: every mutation
    // is a single insert or remove.
    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks `key` as in flight; returns false if it already was
    pub fn acquire(&self, key: &Path) -> bool {
        self.lock().insert(key.to_path_buf())
    }

    /// Clears `key`; releasing a key that isn't held is a no-op
    pub fn release(&self, key: &Path) {
        self.lock().remove(key);
    }

    /// Acquires `key` and returns a guard that releases it on drop
    pub fn reserve(self: &Arc<Self>, key: &Path) -> Option<Reservation> {
        self.acquire(key).then(|| Reservation {
            guard: Arc::clone(self),
            key: key.to_path_buf(),
        })
    }

    pub fn is_in_flight(&self, key: &Path) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Holds one destination path in flight until dropped
#[derive(Debug)]
pub struct Reservation {
    guard: Arc<InFlightGuard>,
    key: PathBuf,
}

impl Reservation {
    pub fn key(&self) -> &Path {
        &self.key
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.guard.release(&self.key);
    }
}
