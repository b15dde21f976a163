//! Change events flowing through the mirror pipeline
//!
//! [`RawEvent`] is what the watch layer hands to the router: a filesystem
//! notification that has been decoupled from the `notify` crate's types.
//! [`ChangeEvent`] is what the router emits once it has processed a raw
//! event, and is the only thing listeners ever see.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ChangeKind
// ============================================================================

/// Outcome category of a processed change
///
/// `All` is the error sentinel: mapping failures, I/O failures and watch
/// primitive errors are all reported with this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
    Renamed,
    All,
}

impl ChangeKind {
    /// Returns true for the error sentinel
    pub fn is_error(&self) -> bool {
        matches!(self, ChangeKind::All)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Created => "Created",
            ChangeKind::Changed => "Changed",
            ChangeKind::Deleted => "Deleted",
            ChangeKind::Renamed => "Renamed",
            ChangeKind::All => "All",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// ChangeEvent
// ============================================================================

/// Title used for every error-sentinel event
pub const ERROR_TITLE: &str = "Error";

/// Outcome of processing one raw filesystem event
///
/// Emitted exactly once per processed [`RawEvent`]; ownership passes to the
/// listener immediately and nothing retains it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Short heading, usually the kind name or `"Error"`
    pub title: String,
    /// Detail line, usually the mapped destination path
    pub text: String,
    /// Outcome category
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Creates a success event whose title is the kind name
    pub fn new(kind: ChangeKind, text: impl Into<String>) -> Self {
        Self {
            title: kind.to_string(),
            text: text.into(),
            kind,
        }
    }

    /// Creates a success event pointing at a destination path
    pub fn for_path(kind: ChangeKind, path: &Path) -> Self {
        Self::new(kind, path.display().to_string())
    }

    /// Creates an error-sentinel event
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            title: ERROR_TITLE.to_string(),
            text: text.into(),
            kind: ChangeKind::All,
        }
    }

    /// Creates the event reported for a rename, `old -> new`
    pub fn renamed(old_dest: &Path, new_dest: &Path) -> Self {
        Self::new(
            ChangeKind::Renamed,
            format!("{} -> {}", old_dest.display(), new_dest.display()),
        )
    }

    /// Returns true if this event reports a failure
    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }
}

// ============================================================================
// RawEvent
// ============================================================================

/// Kind of a raw notification from the watch primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventKind {
    Created,
    Changed,
    Deleted,
    /// Rename within the watched tree; `old_source_path` is set
    Renamed,
    /// Internal watch error (e.g. event queue overflow), carrying its text
    Error(String),
}

/// A filesystem notification as seen by the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    /// Affected path; for renames, the new path
    pub source_path: PathBuf,
    /// Previous path, only for renames
    pub old_source_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    fn with_kind(kind: RawEventKind, source_path: PathBuf) -> Self {
        Self {
            kind,
            source_path,
            old_source_path: None,
            timestamp: Utc::now(),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::with_kind(RawEventKind::Created, path.into())
    }

    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self::with_kind(RawEventKind::Changed, path.into())
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::with_kind(RawEventKind::Deleted, path.into())
    }

    pub fn renamed(old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> Self {
        Self {
            old_source_path: Some(old.into()),
            ..Self::with_kind(RawEventKind::Renamed, new.into())
        }
    }

    /// An error notification; carries no meaningful path
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_kind(RawEventKind::Error(message.into()), PathBuf::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_event_title_is_kind_name() {
        let event = ChangeEvent::for_path(ChangeKind::Created, Path::new("/out/Views/A.cshtml"));
        assert_eq!(event.title, "Created");
        assert_eq!(event.text, "/out/Views/A.cshtml");
        assert!(!event.is_error());
    }

    #[test]
    fn test_error_event_uses_sentinel_kind() {
        let event = ChangeEvent::error("disk on fire");
        assert_eq!(event.title, ERROR_TITLE);
        assert_eq!(event.kind, ChangeKind::All);
        assert!(event.is_error());
    }

    #[test]
    fn test_renamed_event_text() {
        let event = ChangeEvent::renamed(
            Path::new("/out/Views/Home/A.cshtml"),
            Path::new("/out/Views/Home/B.cshtml"),
        );
        assert_eq!(event.kind, ChangeKind::Renamed);
        assert_eq!(
            event.text,
            "/out/Views/Home/A.cshtml -> /out/Views/Home/B.cshtml"
        );
    }

    #[test]
    fn test_raw_rename_keeps_both_paths() {
        let raw = RawEvent::renamed("/src/a.cshtml", "/src/b.cshtml");
        assert_eq!(raw.kind, RawEventKind::Renamed);
        assert_eq!(raw.source_path, PathBuf::from("/src/b.cshtml"));
        assert_eq!(raw.old_source_path, Some(PathBuf::from("/src/a.cshtml")));
    }

    #[test]
    fn test_change_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ChangeKind::Renamed).unwrap();
        assert_eq!(json, "\"renamed\"");
    }
}
