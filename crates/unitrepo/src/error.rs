//! Error types for repository lookups.
//!
//! Lookup failures are categorized so callers can tell a unit that simply
//! does not exist apart from a repository that is broken or unreadable.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of repository errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The requested unit, version or variant does not exist
    NotFound,
    /// The repository content does not follow the expected layout
    Layout,
    /// Reading the repository failed
    Io,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "Unit not found in repository",
            Self::Layout => "Malformed repository",
            Self::Io => "Repository not readable",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::NotFound => "Check the unit name, version and variant in the desired model",
            Self::Layout => "Each <name>/<version>/<variant>/ directory must hold exactly one payload",
            Self::Io => "Check that the repository root exists and is readable",
        }
    }
}

/// Errors that can occur while resolving units or fetching their content.
#[derive(Debug, Error)]
pub enum Error {
    /// No unit matches the requested name, version and variant
    #[error("unit not found: {name} (version {version}, variant {variant})")]
    NotFound {
        /// Requested unit name
        name: String,
        /// Requested version spec
        version: String,
        /// Requested variant
        variant: String,
    },

    /// The unit exists but has no payload file
    #[error("no payload for {unit}")]
    NoPayload {
        /// Display form of the unit reference
        unit: String,
    },

    /// The repository layout is invalid
    #[error("invalid repository layout at {path}: {message}")]
    InvalidLayout {
        /// Offending path
        path: PathBuf,
        /// What is wrong with it
        message: String,
    },

    /// IO error
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotFound { .. } | Error::NoPayload { .. } => ErrorCategory::NotFound,
            Error::InvalidLayout { .. } => ErrorCategory::Layout,
            Error::Io { .. } => ErrorCategory::Io,
        }
    }

    /// Whether this error means the unit does not exist (as opposed to a broken repository).
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = Error::NotFound {
            name: "agent".to_string(),
            version: "latest".to_string(),
            variant: "x64".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(err.is_not_found());

        let err = Error::InvalidLayout {
            path: PathBuf::from("/repo/agent/1.0/x64"),
            message: "two payloads".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Layout);
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::NotFound {
            name: "agent".to_string(),
            version: "2.0".to_string(),
            variant: "x64".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unit not found: agent (version 2.0, variant x64)"
        );
    }
}
