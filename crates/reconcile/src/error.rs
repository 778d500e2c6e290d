//! Error taxonomy for reconciliation jobs.
//!
//! Errors are categorized by where in the job they happen, because that
//! decides what the operator can safely do next:
//! - before any remote mutation the whole job can simply be retried
//! - once the agent was commanded the target state is unknown
//! - a job that ran and reported failures has a definite outcome

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Where in the job an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Diff, plan or transfer: nothing ran on the target yet
    BeforeMutation,
    /// The agent may have applied part of the work order
    Indeterminate,
    /// The agent ran and reported failed or missing operations
    Outcome,
}

impl ErrorCategory {
    /// Whether re-running the whole job is safe without looking at the target first.
    pub fn is_safe_to_retry(&self) -> bool {
        matches!(self, Self::BeforeMutation)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BeforeMutation => "Job aborted before the target was changed",
            Self::Indeterminate => "Target state unknown",
            Self::Outcome => "Job finished with failures",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::BeforeMutation => "Fix the cause and run the job again",
            Self::Indeterminate => "Resume the job or rescan the target before assuming failure",
            Self::Outcome => "Inspect the attached log excerpts, then run the job again",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during a reconciliation job.
#[derive(Debug, Error)]
pub enum Error {
    /// A desired directive could not be mapped to a concrete unit
    #[error("cannot resolve `{directive}`: {source}")]
    Resolution {
        /// The directive as written
        directive: String,
        /// Repository error
        #[source]
        source: unitrepo::Error,
    },

    /// The desired model text is malformed
    #[error("invalid desired model at line {line}: {message}")]
    Model {
        /// Line number (1-indexed)
        line: usize,
        /// What is wrong
        message: String,
    },

    /// A job id that cannot tag a status flag or name a directory
    #[error("invalid job id `{job_id}`: use letters, digits, `.`, `_` and `-`")]
    InvalidJobId {
        /// The rejected id
        job_id: String,
    },

    /// Content for a planned unit could not be fetched
    #[error("cannot fetch content for {unit}: {source}")]
    Repository {
        /// Unit display form
        unit: String,
        /// Repository error
        #[source]
        source: unitrepo::Error,
    },

    /// The target cannot hold the staged content
    #[error("job {job_id}: not enough space for {what} (need {required} bytes, {available} free)")]
    InsufficientSpace {
        /// Job identifier
        job_id: String,
        /// Unit display form, or "work order" for the aggregate check
        what: String,
        /// Bytes required including the safety factor
        required: u64,
        /// Bytes free on the target
        available: u64,
    },

    /// Copying content or writing the descriptor failed
    #[error("job {job_id}: transfer of {unit} failed: {message}")]
    Transfer {
        /// Job identifier
        job_id: String,
        /// Unit display form or file name
        unit: String,
        /// What failed
        message: String,
    },

    /// A descriptor could not be written, read or understood
    #[error("job {job_id}: descriptor error: {message}")]
    Descriptor {
        /// Job identifier
        job_id: String,
        /// What is wrong
        message: String,
    },

    /// The command directive could not be written or the agent not started
    #[error("job {job_id}: agent start failed: {message}")]
    AgentStart {
        /// Job identifier
        job_id: String,
        /// What failed
        message: String,
    },

    /// The target stayed unreachable longer than the reboot grace period
    #[error("job {job_id}: target unreachable for {}s (reboot grace period exceeded)", .elapsed.as_secs())]
    AgentUnreachable {
        /// Job identifier
        job_id: String,
        /// How long the target has been unreachable
        elapsed: Duration,
        /// Last log line seen before the target went away
        last_log: Option<String>,
    },

    /// The caller's deadline passed before the agent finished
    #[error("job {job_id}: agent still busy after {}s", .waited.as_secs())]
    AgentTimeout {
        /// Job identifier
        job_id: String,
        /// How long we waited
        waited: Duration,
    },

    /// The agent's result is missing entries for planned operations
    #[error("job {job_id}: no result for {}", .missing.join(", "))]
    PartialResult {
        /// Job identifier
        job_id: String,
        /// Units without a result entry
        missing: Vec<String>,
    },

    /// The agent reported failed operations
    #[error("job {job_id}: failed: {}", .failed.join(", "))]
    JobFailed {
        /// Job identifier
        job_id: String,
        /// Units that did not complete
        failed: Vec<String>,
        /// Log excerpt of the first failure
        excerpt: Option<String>,
    },

    /// Talking to the target failed outside of a specific stage
    #[error("target error: {0}")]
    Remote(#[from] remote::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Resolution { .. }
            | Error::Model { .. }
            | Error::InvalidJobId { .. }
            | Error::Repository { .. }
            | Error::InsufficientSpace { .. }
            | Error::Transfer { .. }
            | Error::Remote(_) => ErrorCategory::BeforeMutation,
            Error::Descriptor { .. }
            | Error::AgentStart { .. }
            | Error::AgentUnreachable { .. }
            | Error::AgentTimeout { .. } => ErrorCategory::Indeterminate,
            Error::PartialResult { .. } | Error::JobFailed { .. } => ErrorCategory::Outcome,
        }
    }

    /// Whether re-running the whole job is safe.
    pub fn is_safe_to_retry(&self) -> bool {
        self.category().is_safe_to_retry()
    }

    /// Diagnostic text attached to the error, if any.
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            Error::AgentUnreachable { last_log, .. } => last_log.as_deref(),
            Error::JobFailed { excerpt, .. } => excerpt.as_deref(),
            _ => None,
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
