//! Error types shared across the governor components

use thiserror::Error;

/// Errors reported by a storage handle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The handle was closed or never opened
    #[error("storage handle is closed")]
    Closed,

    /// A statement failed on the storage engine
    #[error("statement failed: {0}")]
    Statement(String),

    /// Pool statistics could not be read
    #[error("pool statistics unavailable: {0}")]
    Stats(String),
}

/// Substrings that identify lock/deadlock-class contention errors.
///
/// Matching is case-insensitive against the rendered error message.
pub const TRANSIENT_ERROR_PATTERNS: &[&str] = &[
    "deadlock",
    "lock wait timeout",
    "database is locked",
    "database table is locked",
    "could not serialize access",
    "try restarting transaction",
    "sqlite_busy",
    "lock timeout",
];

impl StorageError {
    /// Returns true if the error is a transient contention error worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Closed => false,
            other => is_transient_message(&other.to_string()),
        }
    }
}

/// Check an arbitrary error message against the transient error patterns
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_ERROR_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Errors surfaced by governor operations
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A transient error persisted across every allowed attempt
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: StorageError,
    },

    /// A table or column name contained characters outside [A-Za-z0-9_]
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl From<config::ConfigError> for GovernorError {
    fn from(err: config::ConfigError) -> Self {
        GovernorError::Config(err.to_string())
    }
}

impl From<std::io::Error> for GovernorError {
    fn from(err: std::io::Error) -> Self {
        GovernorError::Export(err.to_string())
    }
}

impl From<serde_json::Error> for GovernorError {
    fn from(err: serde_json::Error) -> Self {
        GovernorError::Export(err.to_string())
    }
}

pub type Result<T, E = GovernorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Statement("Deadlock found when trying to get lock".into()).is_transient());
        assert!(StorageError::Statement("database is locked".into()).is_transient());
        assert!(StorageError::Statement(
            "ERROR: could not serialize access due to concurrent update".into()
        )
        .is_transient());
        assert!(!StorageError::Statement("syntax error at or near FROM".into()).is_transient());
        assert!(!StorageError::Closed.is_transient());
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = GovernorError::RetriesExhausted {
            operation: "cleanup users".into(),
            attempts: 3,
            last_error: StorageError::Statement("deadlock detected".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("cleanup users"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("deadlock detected"));
    }
}
