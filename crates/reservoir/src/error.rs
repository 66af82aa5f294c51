//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The policy failed to create or open a new resource.
    #[error("failed to create resource: {0}")]
    Creation(#[source] PolicyError),

    /// A lent resource failed re-validation and its replacement failed too.
    #[error("resource validation failed: {0}")]
    Validation(#[source] PolicyError),

    /// Failed to acquire a resource within the timeout.
    #[error("resource acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// The deadline elapsed while timeout errors are disabled.
    ///
    /// This is the "empty result" of a timed-out acquisition. The timeout
    /// hook has already fired; [`PoolError::is_timeout`] reports `true`.
    #[error("no resource available after {0:?}")]
    TimeoutSuppressed(Duration),

    /// The asynchronous wait queue is full.
    #[error("async wait queue is full ({capacity} waiters)")]
    CapacityExceeded {
        /// Configured async wait queue capacity.
        capacity: usize,
    },

    /// The lease was not on loan from this pool.
    #[error("resource is not on loan from this pool")]
    InvalidReturn,

    /// The pool tripped its failure threshold and is waiting for recovery.
    #[error("pool `{pool}` is unavailable until the background check recovers it: {cause}")]
    Unavailable {
        /// Policy name.
        pool: String,
        /// Failure that caused the transition.
        cause: String,
    },

    /// Pool is closed or closing.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// An asynchronous acquisition was cancelled.
    #[error("resource acquisition cancelled")]
    Cancelled,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error is an elapsed acquisition deadline.
    ///
    /// True for both the raised and the suppressed form.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionTimeout(_) | Self::TimeoutSuppressed(_)
        )
    }

    /// Check if retrying the acquisition later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionTimeout(_)
                | Self::TimeoutSuppressed(_)
                | Self::CapacityExceeded { .. }
                | Self::Unavailable { .. }
                | Self::Creation(_)
                | Self::Validation(_)
        )
    }
}

/// Error reported by a [`PoolPolicy`](crate::PoolPolicy) hook.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PolicyError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PolicyError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message, without the source chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_timeout_classification() {
        let raised = PoolError::AcquisitionTimeout(Duration::from_millis(50));
        let suppressed = PoolError::TimeoutSuppressed(Duration::from_millis(50));

        assert!(raised.is_timeout());
        assert!(suppressed.is_timeout());
        assert!(!PoolError::InvalidReturn.is_timeout());
        assert!(!PoolError::CapacityExceeded { capacity: 1 }.is_timeout());
    }

    #[test]
    fn test_transient_classification() {
        assert!(PoolError::CapacityExceeded { capacity: 4 }.is_transient());
        assert!(
            PoolError::Unavailable {
                pool: "db".into(),
                cause: "refused".into()
            }
            .is_transient()
        );
        assert!(!PoolError::ShuttingDown.is_transient());
        assert!(!PoolError::InvalidReturn.is_transient());
        assert!(!PoolError::Configuration("bad".into()).is_transient());
    }

    #[test]
    fn test_policy_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = PoolError::Creation(PolicyError::with_source("open failed", io));

        assert_eq!(err.to_string(), "failed to create resource: open failed");
        let policy = err.source().unwrap();
        assert_eq!(policy.to_string(), "open failed");
        assert_eq!(policy.source().unwrap().to_string(), "refused");
    }

    #[test]
    fn test_unavailable_message_names_pool() {
        let err = PoolError::Unavailable {
            pool: "orders".into(),
            cause: "login failed".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`orders`"));
        assert!(msg.contains("login failed"));
    }
}
