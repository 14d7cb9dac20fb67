//! Error types for exposecast.
//!
//! Library crates use [`ExposecastError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all exposecast operations.
#[derive(Debug, thiserror::Error)]
pub enum ExposecastError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to an upstream service.
    #[error("network error: {0}")]
    Network(String),

    /// CRM gateway failure (transport or unexpected response).
    #[error("CRM gateway error: {0}")]
    Crm(String),

    /// The uploaded document could not be turned into text.
    #[error("document error: {0}")]
    Document(String),

    /// Model output or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The task runner has no free capacity for another submission.
    #[error("runner overloaded: {in_flight} tasks already admitted")]
    Overloaded { in_flight: usize },

    /// A deadline elapsed before the work finished.
    #[error("{0} deadline exceeded")]
    Timeout(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ExposecastError>;

impl ExposecastError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
