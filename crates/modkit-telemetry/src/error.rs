//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while setting up or driving the logger.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid configuration (unknown level name, bad path or prefix, zero limits).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A sink could not be created.
    #[error("Sink IO error at {}: {source}", path.display())]
    SinkIoError {
        /// The file or directory that could not be created or opened.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Initialization error (e.g. a global dispatcher is already installed).
    #[error("Initialization error: {0}")]
    InitError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TelemetryError {
    pub(crate) fn sink_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SinkIoError {
            path: path.into(),
            source,
        }
    }
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
