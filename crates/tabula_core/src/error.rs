//! Error types for Tabula core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tabula core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A unique index already holds a row under this key, or a foreign
    /// index bucket already holds this row.
    #[error("duplicate key in index {index}: {key}")]
    DuplicateKey {
        /// Name of the index that rejected the insertion.
        index: String,
        /// Rendered form of the offending key.
        key: String,
    },

    /// A foreign index key has no counterpart in its parent unique index.
    #[error("missing parent key in index {index}: {key}")]
    MissingParentKey {
        /// Name of the foreign index.
        index: String,
        /// Rendered form of the key absent from the parent.
        key: String,
    },

    /// A parent-index mutation would orphan rows in a dependent foreign index.
    #[error("{operation} on index {index} would orphan dependent rows")]
    ConstraintViolation {
        /// The vetoed parent operation (`delete` or `update`).
        operation: &'static str,
        /// Name of the foreign index holding the dependent rows.
        index: String,
    },

    /// A find-by-key that must succeed found nothing.
    #[error("record not found in {table}: {key}")]
    RecordNotFound {
        /// Name of the table or index searched.
        table: String,
        /// Rendered form of the key that was not found.
        key: String,
    },

    /// A timed lock acquisition expired before the lock was granted.
    #[error("lock acquisition timed out")]
    LockTimeout,

    /// A lock acquisition was cancelled mid-wait.
    #[error("lock acquisition cancelled")]
    WaitCancelled,

    /// A lock exit did not match a corresponding enter.
    #[error("invalid lock state: {message}")]
    InvalidLockState {
        /// Description of the mismatch.
        message: String,
    },

    /// A millisecond timeout outside the accepted range (-1, 0, positive).
    #[error("invalid timeout: {millis} ms")]
    InvalidTimeout {
        /// The rejected value.
        millis: i64,
    },

    /// An index was used before its key function was configured.
    #[error("index {index} has no key function configured")]
    KeyFunctionMissing {
        /// Name of the unconfigured index.
        index: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a duplicate key error.
    pub fn duplicate_key(index: impl Into<String>, key: &impl std::fmt::Debug) -> Self {
        Self::DuplicateKey {
            index: index.into(),
            key: format!("{key:?}"),
        }
    }

    /// Creates a missing parent key error.
    pub fn missing_parent_key(index: impl Into<String>, key: &impl std::fmt::Debug) -> Self {
        Self::MissingParentKey {
            index: index.into(),
            key: format!("{key:?}"),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint_violation(operation: &'static str, index: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            operation,
            index: index.into(),
        }
    }

    /// Creates a record not found error.
    pub fn record_not_found(table: impl Into<String>, key: &impl std::fmt::Debug) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            key: format!("{key:?}"),
        }
    }

    /// Creates an invalid lock state error.
    pub fn invalid_lock_state(message: impl Into<String>) -> Self {
        Self::InvalidLockState {
            message: message.into(),
        }
    }

    /// Creates a key function missing error.
    pub fn key_function_missing(index: impl Into<String>) -> Self {
        Self::KeyFunctionMissing {
            index: index.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
