//! Error types for the bylaw archive.
//!
//! Library crates use [`BylawError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all archive operations.
#[derive(Debug, thiserror::Error)]
pub enum BylawError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during fetch.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Datastore error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A write-once path was already occupied.
    #[error("conflict: {path} already exists")]
    Conflict { path: String },

    /// A record or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, unknown enum value, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Headless browser error.
    #[error("browser error: {0}")]
    Browser(String),

    /// Illegal job lifecycle transition.
    #[error("invalid job transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Task queue error.
    #[error("task error: {0}")]
    Task(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BylawError>;

impl BylawError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a storage error from any displayable value.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short variant name, recorded as the error type of failed jobs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::Network(_) => "Network",
            Self::Parse { .. } => "Parse",
            Self::Storage(_) => "Storage",
            Self::Conflict { .. } => "Conflict",
            Self::NotFound(_) => "NotFound",
            Self::Io { .. } => "Io",
            Self::Validation { .. } => "Validation",
            Self::Browser(_) => "Browser",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::Task(_) => "Task",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BylawError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = BylawError::Conflict {
            path: "j1/example.ca/2024/01/01/000000/page.html".into(),
        };
        assert!(err.to_string().starts_with("conflict:"));
        assert_eq!(err.kind(), "Conflict");
    }

    #[test]
    fn transition_error_names_states() {
        let err = BylawError::InvalidTransition {
            from: "completed".into(),
            to: "running".into(),
        };
        assert_eq!(err.to_string(), "invalid job transition completed -> running");
    }
}
