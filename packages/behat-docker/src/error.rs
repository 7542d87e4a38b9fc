//! Error types for behat-docker.
//!
//! Failures of the Behat process itself are not errors of this crate: they are
//! reported per test as [`crate::exec::ExecFailure`] values. `BehatDockerError`
//! covers everything that stops an operation from running at all.

use thiserror::Error;

/// Main error type for the behat-docker library.
#[derive(Debug, Error)]
pub enum BehatDockerError {
    /// No container name configured; nothing can be executed.
    #[error("Docker container name is not configured. Please configure it in settings.")]
    MissingContainerName,

    /// Any other invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The settings file could not be parsed.
    #[error("Failed to parse settings file {path}: {source}")]
    SettingsParse {
        path: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// The feature glob could not be compiled.
    #[error("Invalid feature glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    /// Walking the workspace failed.
    #[error("Failed to scan workspace: {0}")]
    Walk(#[from] walkdir::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Starting or stopping a debug session failed.
    #[error("Debug session error: {0}")]
    DebugSession(String),

    /// A test selector matched nothing in the tree.
    #[error("No test matches '{0}'")]
    UnknownTest(String),
}

/// Result type alias for behat-docker operations.
pub type Result<T> = std::result::Result<T, BehatDockerError>;
