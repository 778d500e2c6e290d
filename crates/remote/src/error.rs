//! Error types for target channels.
//!
//! Only an unreachable target is considered transient. Everything else is
//! reported as-is so the caller can decide whether the job can go on.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of channel errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Target could not be reached (transient, retryable)
    Unreachable,
    /// Key or file does not exist
    NotFound,
    /// Local or remote IO failure
    Io,
    /// Malformed data on the target
    Format,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unreachable => "Target unreachable",
            Self::NotFound => "Not found on target",
            Self::Io => "IO failure",
            Self::Format => "Malformed data on target",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors that can occur on a target channel.
#[derive(Debug, Error)]
pub enum Error {
    /// Target could not be reached
    #[error("target unreachable: {message}")]
    Unreachable {
        /// Transport detail
        message: String,
    },

    /// Control key does not exist
    #[error("key not found: {path}\\{name}")]
    KeyNotFound {
        /// Key path
        path: String,
        /// Value name
        name: String,
    },

    /// File does not exist on the target
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Path is not acceptable for the target
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// IO error
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unreachable { .. } => ErrorCategory::Unreachable,
            Error::KeyNotFound { .. } | Error::FileNotFound(_) => ErrorCategory::NotFound,
            Error::Io { .. } => ErrorCategory::Io,
            Error::Json(_) | Error::InvalidPath(_) => ErrorCategory::Format,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error means the key or file does not exist.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unreachable(message: impl Into<String>) -> Self {
        Error::Unreachable {
            message: message.into(),
        }
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unreachable_is_retryable() {
        assert!(Error::unreachable("reset by peer").is_retryable());
        assert!(!Error::FileNotFound("a/b".into()).is_retryable());
        assert!(!Error::Other("boom".into()).is_retryable());
    }

    #[test]
    fn test_not_found() {
        let err = Error::KeyNotFound {
            path: "Software/Patchbay".into(),
            name: "manifest".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "key not found: Software/Patchbay\\manifest");
    }
}
