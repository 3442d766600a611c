use thiserror::Error;

use crate::core::types::RevisionId;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can go wrong between observing a head and recording it.
///
/// None of these are swallowed by the monitor: whatever happens during
/// materialization or persistence reaches the caller of
/// `on_change_detected`, and the cached/persisted heads are left as they were.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Invalid or missing branch/repository reference. Never retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The branch does not exist in the source repository.
    #[error("branch `{branch}` not found in {repository}")]
    RefNotFound { repository: String, branch: String },

    /// Clone, fetch or checkout failed. The orchestrator may retry.
    #[error("{operation} failed: {source}")]
    Recoverable {
        operation: &'static str,
        #[source]
        source: git2::Error,
    },

    /// The requested revision is not present in the cloned history.
    #[error("revision {0} not found during checkout")]
    RevisionNotFound(RevisionId),

    /// The checkout does not point at the requested revision; the ref moved
    /// between observation and checkout.
    #[error("checked out {actual} while {expected} was requested")]
    Consistency { expected: RevisionId, actual: String },

    /// Resource exhaustion or storage failure.
    #[error("{context}: {source}")]
    Fatal {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("monitor for {0} has not been bootstrapped")]
    NotBootstrapped(String),
}

impl MonitorError {
    pub fn fatal(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        MonitorError::Fatal {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn recoverable(operation: &'static str, source: git2::Error) -> Self {
        MonitorError::Recoverable { operation, source }
    }

    /// Whether an orchestrator may reasonably issue the same notification again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MonitorError::Recoverable { .. } | MonitorError::RevisionNotFound(_)
        )
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
