//! Domain-level error types for repo-mirror.
//!
//! Two families live here: `AppError` for operations that fail outright
//! (storage, configuration, IO) and `FetchFailure` for sync attempts, which
//! are reported as values instead of being propagated.

use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Failed to open, query or write the local database.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid data or arguments.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// JSON encoding or decoding failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Classify this error for reporting through the sync error slot.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::JsonParse { .. } => ErrorKind::Decode,
            _ => ErrorKind::StorageFault,
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Category of a failed sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The remote answered with a non-success status.
    RemoteRejected,
    /// No response: connection, DNS, TLS or timeout fault.
    Unreachable,
    /// The response body could not be decoded.
    Decode,
    /// The local database failed while merging.
    StorageFault,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteRejected => write!(f, "remote rejected"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Decode => write!(f, "decode"),
            Self::StorageFault => write!(f, "storage fault"),
        }
    }
}

/// A failed fetch-and-merge attempt, as published to observers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<AppError> for FetchFailure {
    fn from(err: AppError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
