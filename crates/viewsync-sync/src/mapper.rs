//! Source-to-destination path mapping
//!
//! A source file qualifies for mirroring when none of its path components is
//! an ignored segment and it lives somewhere below a directory literally
//! named `Views`. The destination keeps everything from that first `Views`
//! component onwards, re-rooted under the destination root:
//!
//! ```text
//! /src/Shop/Web/Views/Home/Index.cshtml   (dest_root = /out)
//!                ──────────────────────
//!        ──→  /out/Views/Home/Index.cshtml
//! ```
//!
//! Everything here is pure: no filesystem access, same answer for the same
//! snapshot.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use viewsync_core::WatchConfig;

/// Directory name that anchors the mirrored part of a path.
pub const ANCHOR_SEGMENT: &str = "Views";

/// Why a source path was not mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The path contains an ignored segment (reported as it appears in the path)
    Ignored(String),
    /// No `Views` directory in the path
    NoAnchor,
}

/// Maps qualifying source paths into the destination tree
#[derive(Debug, Clone)]
pub struct PathMapper {
    dest_root: PathBuf,
    /// Ignored segments, lowercased
    ignored: HashSet<String>,
}

impl PathMapper {
    pub fn new<I, S>(dest_root: impl Into<PathBuf>, ignored_segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            dest_root: dest_root.into(),
            ignored: ignored_segments
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Builds a mapper for one configuration snapshot
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.dest_root.clone(), &config.ignored_segments)
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    /// Maps `source` to its destination, or `None` if it doesn't qualify
    pub fn map(&self, source: &Path) -> Option<PathBuf> {
        self.classify(source).ok()
    }

    /// Like [`map`](Self::map), but reports why a path was rejected
    pub fn classify(&self, source: &Path) -> Result<PathBuf, Rejection> {
        let components: Vec<Component<'_>> = source.components().collect();

        if let Some(segment) = components.iter().find_map(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                self.ignored
                    .contains(&name.to_lowercase())
                    .then(|| name.into_owned())
            }
            _ => None,
        }) {
            return Err(Rejection::Ignored(segment));
        }

        // The anchor must be a directory, so something has to follow it.
        let anchor = components
            .iter()
            .position(|c| matches!(c, Component::Normal(name) if *name == ANCHOR_SEGMENT))
            .filter(|&idx| idx + 1 < components.len())
            .ok_or(Rejection::NoAnchor)?;

        let relative: PathBuf = components[anchor..].iter().collect();
        Ok(self.dest_root.join(relative))
    }
}

/// Returns true if `path` has the tracked extension (case-insensitive)
///
/// `extension` may be given with or without its leading dot.
pub fn has_tracked_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

/// Returns true if `dir` is a `Views` directory itself
pub fn is_anchor_dir(dir: &Path) -> bool {
    dir.file_name()
        .map(|name| name == ANCHOR_SEGMENT)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new("/out", ["bin", "obj", "node_modules"])
    }

    #[test]
    fn test_maps_suffix_from_views() {
        let dest = mapper().map(Path::new("/root/sub/Views/Home/Index.cshtml"));
        assert_eq!(dest, Some(PathBuf::from("/out/Views/Home/Index.cshtml")));
    }

    #[test]
    fn test_preserves_deep_structure() {
        let dest = mapper().map(Path::new(
            "/src/Shop/Areas/Admin/Views/Shared/Partials/_Nav.cshtml",
        ));
        assert_eq!(
            dest,
            Some(PathBuf::from("/out/Views/Shared/Partials/_Nav.cshtml"))
        );
    }

    #[test]
    fn test_first_views_component_is_anchor() {
        let dest = mapper().map(Path::new("/src/Views/Legacy/Views/Home/A.cshtml"));
        assert_eq!(
            dest,
            Some(PathBuf::from("/out/Views/Legacy/Views/Home/A.cshtml"))
        );
    }

    #[test]
    fn test_rejects_paths_without_anchor() {
        let m = mapper();
        for p in [
            "/src/Shop/Pages/Index.cshtml",
            "/src/Shop/views/Home/Index.cshtml",
            "/src/Shop/MyViews/Index.cshtml",
            "/src/Shop/Views",
        ] {
            assert_eq!(m.classify(Path::new(p)), Err(Rejection::NoAnchor), "{p}");
        }
    }

    #[test]
    fn test_rejects_ignored_segments_anywhere() {
        let m = mapper();
        for p in [
            "/src/bin/Views/Home/Index.cshtml",
            "/src/Shop/Views/obj/Index.cshtml",
            "/node_modules/Views/a.cshtml",
        ] {
            assert!(m.map(Path::new(p)).is_none(), "{p} should be ignored");
        }
    }

    #[test]
    fn test_ignored_segments_are_case_insensitive() {
        let m = PathMapper::new("/out", ["Bin"]);
        assert_eq!(
            m.classify(Path::new("/src/BIN/Views/Home/A.cshtml")),
            Err(Rejection::Ignored("BIN".to_string()))
        );
    }

    #[test]
    fn test_ignored_segment_must_be_whole_component() {
        let dest = mapper().map(Path::new("/src/binary/Views/Home/A.cshtml"));
        assert_eq!(dest, Some(PathBuf::from("/out/Views/Home/A.cshtml")));
    }

    #[test]
    fn test_ignored_wins_over_anchor() {
        let m = PathMapper::new("/out", ["Views"]);
        assert!(matches!(
            m.classify(Path::new("/src/Views/Home/A.cshtml")),
            Err(Rejection::Ignored(_))
        ));
    }

    #[test]
    fn test_from_config_uses_snapshot_fields() {
        let mut config = WatchConfig::default();
        config.dest_root = PathBuf::from("/site");
        config.ignored_segments = vec!["Temp".to_string()];
        let m = PathMapper::from_config(&config);

        assert_eq!(m.dest_root(), Path::new("/site"));
        assert!(m.map(Path::new("/src/temp/Views/a/b.cshtml")).is_none());
        assert_eq!(
            m.map(Path::new("/src/Views/a/b.cshtml")),
            Some(PathBuf::from("/site/Views/a/b.cshtml"))
        );
    }

    #[test]
    fn test_tracked_extension() {
        assert!(has_tracked_extension(Path::new("/a/Index.cshtml"), "cshtml"));
        assert!(has_tracked_extension(Path::new("/a/Index.CSHTML"), ".cshtml"));
        assert!(!has_tracked_extension(Path::new("/a/Index.cshtml.bak"), "cshtml"));
        assert!(!has_tracked_extension(Path::new("/a/cshtml"), "cshtml"));
    }

    #[test]
    fn test_is_anchor_dir() {
        assert!(is_anchor_dir(Path::new("/out/Views")));
        assert!(!is_anchor_dir(Path::new("/out/Views/Home")));
    }
}
