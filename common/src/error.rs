//! Error types for the refresh pipeline.

use thiserror::Error;

/// Main error type for fxrefresh operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Base currency is not in the supported allow-list.
    #[error("Unsupported base currency: {0}")]
    UnsupportedBaseCurrency(String),

    /// Secondary currency is not in the supported allow-list.
    #[error("Unsupported secondary currency: {0}")]
    UnsupportedSecondaryCurrency(String),

    /// No record matches the lookup.
    #[error("No record was found")]
    NoRecord,

    /// Storage backend failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored row could not be decoded into a record.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    /// The refresh queue no longer accepts work.
    #[error("Refresh queue is closed")]
    QueueClosed,

    /// Service is not running.
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Worker pool was already started.
    #[error("Worker pool already started")]
    AlreadyStarted,

    /// Rate provider failure surfaced to a caller.
    #[error("Rate provider error: {0}")]
    Provider(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RefreshError {
    /// Validation errors are the caller's fault and should not be retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RefreshError::UnsupportedBaseCurrency(_) | RefreshError::UnsupportedSecondaryCurrency(_)
        )
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RefreshError::Database(_)
                | RefreshError::ServiceUnavailable
                | RefreshError::Provider(_)
        )
    }

    /// Stable error code for logs and external callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            RefreshError::UnsupportedBaseCurrency(_) => "UNSUPPORTED_BASE_CURRENCY",
            RefreshError::UnsupportedSecondaryCurrency(_) => "UNSUPPORTED_SECONDARY_CURRENCY",
            RefreshError::NoRecord => "NO_RECORD",
            RefreshError::Database(_) => "DATABASE_ERROR",
            RefreshError::InvalidRecord(_) => "INVALID_RECORD",
            RefreshError::QueueClosed => "QUEUE_CLOSED",
            RefreshError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            RefreshError::AlreadyStarted => "ALREADY_STARTED",
            RefreshError::Provider(_) => "PROVIDER_ERROR",
            RefreshError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for fxrefresh operations.
pub type Result<T> = std::result::Result<T, RefreshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RefreshError::UnsupportedBaseCurrency("USD".into()).is_validation());
        assert!(!RefreshError::NoRecord.is_validation());
        assert!(RefreshError::Database("connection refused".into()).is_retryable());
        assert!(!RefreshError::NoRecord.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RefreshError::UnsupportedSecondaryCurrency("XXX".into()).error_code(),
            "UNSUPPORTED_SECONDARY_CURRENCY"
        );
        assert_eq!(RefreshError::QueueClosed.error_code(), "QUEUE_CLOSED");
    }
}
