use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// No row matched a read, or a mutation expected to touch one row touched none.
    #[error("no matching row")]
    NotFound,
    /// An insert reported zero rows changed.
    #[error("statement affected no rows")]
    NotAffected,
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("storage operation timed out")]
    Timeout,
    #[error("storage operation cancelled")]
    Cancelled,
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to establish database connection: {0}")]
    Connection(String),
    #[error("failed to decode row: {0}")]
    Decode(String),
    #[error("storage query failed: {0}")]
    Query(String),
}

impl StorageError {
    /// Deadline and cancellation failures may succeed when issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return Self::Conflict(db_err.message().to_string());
            }
        }

        let message = err.to_string();

        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::PoolTimedOut => Self::Timeout,
            sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Unavailable(message),
            sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::Decode(_) => Self::Decode(message),
            _ => Self::Query(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StorageError::Timeout));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_closed_pool_is_unavailable() {
        let err = StorageError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_column_errors_are_decode_failures() {
        let err = StorageError::from(sqlx::Error::ColumnNotFound("missing".to_string()));
        assert!(matches!(err, StorageError::Decode(_)));
    }

    #[test]
    fn test_generic_failures_are_query_errors() {
        let err = StorageError::from(sqlx::Error::Protocol("bad frame".to_string()));
        match err {
            StorageError::Query(message) => assert!(message.contains("bad frame")),
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_only_deadline_errors_are_retryable() {
        assert!(StorageError::Cancelled.is_retryable());
        assert!(!StorageError::NotFound.is_retryable());
        assert!(!StorageError::Conflict("dup".to_string()).is_retryable());
        assert!(!StorageError::Query("boom".to_string()).is_retryable());
    }
}
