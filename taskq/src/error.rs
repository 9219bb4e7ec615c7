//! Error type definitions
//!
//! Provides all possible error types of the queue engine.

use crate::storage::StoreError;
use std::fmt;

/// Result type alias for taskq
pub type Result<T> = std::result::Result<T, Error>;

/// Which uniqueness check rejected an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// A record with the same task id already exists
    Id,
    /// A task with the same payload is already in flight
    Content,
}

impl fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateKind::Id => write!(f, "task id already exists"),
            DuplicateKind::Content => write!(f, "same payload already in flight"),
        }
    }
}

/// Error type for the queue engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store failed or rejected an operation
    #[error("Store error during {op} on '{key}': {source}")]
    Store {
        /// Operation that was running
        op: &'static str,
        /// Key the operation targeted
        key: String,
        /// Underlying store failure
        #[source]
        source: StoreError,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Task validation errors
    #[error("Task validation error: {0}")]
    Validation(String),

    /// Enqueue rejected by an id or content collision
    #[error("Duplicate task {id}: {kind}")]
    DuplicateTask {
        /// Rejected task id
        id: String,
        /// Which check rejected it
        kind: DuplicateKind,
    },

    /// An id left its membership structure but its record was missing
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A batch trigger found no pending members
    #[error("Aggregation group is empty: {0}")]
    EmptyGroup(String),
}

impl Error {
    /// Wrap a store failure with the operation and key it happened on
    pub fn store(op: &'static str, key: impl Into<String>, source: StoreError) -> Self {
        Error::Store {
            op,
            key: key.into(),
            source,
        }
    }

    /// Check if the error is retryable
    ///
    /// Only transport-level failures qualify. The engine never retries them
    /// itself; this is a hint for the caller's own loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store { .. })
    }

    /// Check if the error is fatal (non-recoverable)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Config(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Attach operation context to store results
pub(crate) trait StoreContext<T> {
    fn context(self, op: &'static str, key: &str) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, StoreError> {
    fn context(self, op: &'static str, key: &str) -> Result<T> {
        self.map_err(|e| Error::store(op, key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let err = Error::store("enqueue", "queue:default", StoreError::Unavailable("down".into()));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert!(!Error::Validation("test".to_string()).is_retryable());
        assert!(!Error::Consistency("test".to_string()).is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::Validation("test".to_string()).is_fatal());
        assert!(Error::Config("test".to_string()).is_fatal());
        assert!(!Error::EmptyGroup("g".to_string()).is_fatal());
    }

    #[test]
    fn test_store_error_keeps_context() {
        let result: std::result::Result<(), StoreError> =
            Err(StoreError::WrongType("task:1".into()));
        let err = result.context("dequeue", "queue:default").unwrap_err();

        let message = err.to_string();
        assert!(message.contains("dequeue"));
        assert!(message.contains("queue:default"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_duplicate_display() {
        let err = Error::DuplicateTask {
            id: "t1".into(),
            kind: DuplicateKind::Content,
        };
        assert_eq!(err.to_string(), "Duplicate task t1: same payload already in flight");
    }
}
