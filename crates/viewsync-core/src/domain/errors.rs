//! Domain error types
//!
//! [`ConfigError`] covers everything that can make a configuration unusable
//! for binding a watch: missing roots, roots that are not directories, and
//! failures reading or writing the configuration file.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading, saving or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required root path was left empty
    #[error("{field} is not set")]
    MissingPath {
        /// Name of the offending field, e.g. `"source_root"`
        field: &'static str,
    },

    /// A configured root does not exist or is not a directory
    #[error("Path '{path}' does not exist.")]
    DirectoryNotFound {
        /// Name of the offending field
        field: &'static str,
        /// The configured path
        path: PathBuf,
    },

    /// The configuration file could not be read or written
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`Config`](crate::config::Config)
    #[error("config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Name of the configuration field this error refers to, if any
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::MissingPath { field } => Some(field),
            ConfigError::DirectoryNotFound { field, .. } => Some(field),
            ConfigError::Io { .. } | ConfigError::Parse { .. } => None,
        }
    }
}
