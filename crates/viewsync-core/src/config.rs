//! Configuration module for ViewSync.
//!
//! Provides typed configuration structs that map to the JSON configuration
//! file, with loading, saving, validation, defaults, and a builder pattern
//! for programmatic use. [`WatchConfig`] is the immutable runtime snapshot
//! handed to the router.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ChangeKind, ConfigError};

/// File extension mirrored when none is configured.
pub const DEFAULT_EXTENSION: &str = "cshtml";

/// Milliseconds to wait before the second attempt of a failed file operation.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for ViewSync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchSection,
    pub logging: LoggingConfig,
    pub notify: NotifyConfig,
}

/// What to mirror, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// Root of the solution tree being watched.
    pub source_root: PathBuf,
    /// Root of the tree receiving the mirrored files.
    pub dest_root: PathBuf,
    /// Path components that exclude a file from mirroring (case-insensitive).
    pub ignored_segments: Vec<String>,
    /// Delay before retrying a failed copy or delete, in milliseconds.
    pub retry_delay_ms: u64,
    /// Extension of mirrored files, without the leading dot.
    pub extension: String,
}

/// Change-log and tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether change events are appended to a daily log file.
    pub enabled: bool,
    /// Folder holding the daily log files. No file is written when unset.
    pub directory: Option<PathBuf>,
    /// Tracing level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

/// Which change kinds are worth surfacing to the user.
///
/// Errors are always surfaced; the per-kind flags only apply when
/// `enabled` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub created: bool,
    pub changed: bool,
    pub renamed: bool,
    pub deleted: bool,
}

impl NotifyConfig {
    /// Returns true if an event of `kind` should be surfaced.
    pub fn should_notify(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::All => true,
            ChangeKind::Created => self.enabled && self.created,
            ChangeKind::Changed => self.enabled && self.changed,
            ChangeKind::Renamed => self.enabled && self.renamed,
            ChangeKind::Deleted => self.enabled && self.deleted,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            source_root: PathBuf::new(),
            dest_root: PathBuf::new(),
            ignored_segments: vec!["bin".to_string(), "obj".to_string()],
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: dirs::data_local_dir().map(|d| d.join("viewsync").join("logs")),
            level: "info".to_string(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            created: true,
            changed: true,
            renamed: true,
            deleted: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and saving
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as pretty JSON, creating parent folders.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/viewsync/config.json` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("viewsync")
            .join("config.json")
    }

    /// Build the runtime snapshot consumed by the router.
    pub fn to_snapshot(&self, paused: bool) -> WatchConfig {
        WatchConfig {
            source_root: self.watch.source_root.clone(),
            dest_root: self.watch.dest_root.clone(),
            ignored_segments: self.watch.ignored_segments.clone(),
            retry_delay: Duration::from_millis(self.watch.retry_delay_ms),
            paused,
            extension: self.watch.extension.clone(),
            logging: self.logging.clone(),
            notify: self.notify.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"watch.source_root"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- watch ---
        for (field, path) in [
            ("watch.source_root", &self.watch.source_root),
            ("watch.dest_root", &self.watch.dest_root),
        ] {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be set".into(),
                });
            } else if !path.is_dir() {
                errors.push(ValidationError {
                    field: field.into(),
                    message: format!("directory does not exist: {}", path.display()),
                });
            }
        }

        // Mirrored files would be picked up by the watcher and mapped onto
        // themselves.
        if !self.watch.dest_root.as_os_str().is_empty()
            && !self.watch.source_root.as_os_str().is_empty()
            && self.watch.dest_root.starts_with(&self.watch.source_root)
        {
            errors.push(ValidationError {
                field: "watch.dest_root".into(),
                message: "must not be inside watch.source_root".into(),
            });
        }

        let ext = self.watch.extension.trim_start_matches('.');
        if ext.is_empty() {
            errors.push(ValidationError {
                field: "watch.extension".into(),
                message: "must not be empty".into(),
            });
        }

        if self.watch.ignored_segments.iter().any(|s| s.trim().is_empty()) {
            errors.push(ValidationError {
                field: "watch.ignored_segments".into(),
                message: "entries must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// WatchConfig runtime snapshot
// ---------------------------------------------------------------------------

/// Immutable runtime snapshot of the configuration.
///
/// Published as `Arc<WatchConfig>` by [`ConfigStore`](crate::store::ConfigStore);
/// handlers clone the `Arc` once and read every field from that one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub ignored_segments: Vec<String>,
    pub retry_delay: Duration,
    /// While set, incoming events are discarded unprocessed.
    pub paused: bool,
    pub extension: String,
    pub logging: LoggingConfig,
    pub notify: NotifyConfig,
}

/// Fields of [`WatchConfig`] that can differ between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    SourceRoot,
    DestRoot,
    IgnoredSegments,
    RetryDelay,
    Paused,
    Extension,
    Logging,
    Notify,
}

impl WatchConfig {
    /// Lists the fields whose value differs from `previous`.
    pub fn changed_fields(&self, previous: &WatchConfig) -> Vec<ConfigField> {
        let mut fields = Vec::new();
        if self.source_root != previous.source_root {
            fields.push(ConfigField::SourceRoot);
        }
        if self.dest_root != previous.dest_root {
            fields.push(ConfigField::DestRoot);
        }
        if self.ignored_segments != previous.ignored_segments {
            fields.push(ConfigField::IgnoredSegments);
        }
        if self.retry_delay != previous.retry_delay {
            fields.push(ConfigField::RetryDelay);
        }
        if self.paused != previous.paused {
            fields.push(ConfigField::Paused);
        }
        if self.extension != previous.extension {
            fields.push(ConfigField::Extension);
        }
        if self.logging != previous.logging {
            fields.push(ConfigField::Logging);
        }
        if self.notify != previous.notify {
            fields.push(ConfigField::Notify);
        }
        fields
    }

    /// Checks that both roots exist; required before arming a watch.
    pub fn validate_roots(&self) -> Result<(), ConfigError> {
        require_dir("source_root", &self.source_root)?;
        self.validate_dest_root()
    }

    /// Checks that the destination root exists.
    pub fn validate_dest_root(&self) -> Result<(), ConfigError> {
        require_dir("dest_root", &self.dest_root)
    }

    /// Returns a copy with the pause flag replaced.
    pub fn with_paused(&self, paused: bool) -> Self {
        Self {
            paused,
            ..self.clone()
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Config::default().to_snapshot(false)
    }
}

fn require_dir(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::MissingPath { field });
    }
    if !path.is_dir() {
        return Err(ConfigError::DirectoryNotFound {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use viewsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .source_root(PathBuf::from("/home/user/src/Shop"))
///     .dest_root(PathBuf::from("/srv/shop"))
///     .retry_delay_ms(500)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- watch ---

    pub fn source_root(mut self, root: PathBuf) -> Self {
        self.config.watch.source_root = root;
        self
    }

    pub fn dest_root(mut self, root: PathBuf) -> Self {
        self.config.watch.dest_root = root;
        self
    }

    pub fn ignored_segments<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.watch.ignored_segments = segments.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.watch.retry_delay_ms = ms;
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.config.watch.extension = extension.into();
        self
    }

    // --- logging ---

    pub fn logging_enabled(mut self, enabled: bool) -> Self {
        self.config.logging.enabled = enabled;
        self
    }

    pub fn logging_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.config.logging.directory = directory;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- notify ---

    pub fn notify_enabled(mut self, enabled: bool) -> Self {
        self.config.notify.enabled = enabled;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
