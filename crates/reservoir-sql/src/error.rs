//! Error types for the SQL policy.

use reservoir::{PolicyError, PoolError};
use thiserror::Error;

/// Errors from parsing a connection string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStringError {
    /// A segment had no `=` separator.
    #[error("invalid key-value: {0}")]
    InvalidSegment(String),

    /// A segment had an empty key.
    #[error("missing key in segment: {0}")]
    MissingKey(String),
}

/// Errors reported by a [`SqlSession`](crate::SqlSession) or its factory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Opening the session failed.
    #[error("connection failed: {0}")]
    Open(String),

    /// The session is closed.
    #[error("connection closed")]
    Closed,

    /// A statement failed.
    #[error("query error: {0}")]
    Query(String),

    /// Closing the session failed.
    #[error("failed to close connection: {0}")]
    Close(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Check if this error indicates the backend could not be reached.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Open(_) | Self::Closed | Self::Io(_))
    }
}

impl From<SessionError> for PolicyError {
    fn from(err: SessionError) -> Self {
        PolicyError::with_source(err.to_string(), err)
    }
}

/// Errors from building a SQL pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    /// The pool rejected its configuration.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_session_error_into_policy_error() {
        let err: PolicyError = SessionError::Open("login failed for user 'sa'".into()).into();
        assert_eq!(err.message(), "connection failed: login failed for user 'sa'");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(SessionError::Closed.is_connectivity());
        assert!(SessionError::Open("refused".into()).is_connectivity());
        assert!(!SessionError::Query("syntax".into()).is_connectivity());
    }

    #[test]
    fn test_connection_string_error_display() {
        let err = Error::from(ConnectionStringError::InvalidSegment("Server".into()));
        assert_eq!(
            err.to_string(),
            "invalid connection string: invalid key-value: Server"
        );
    }
}
