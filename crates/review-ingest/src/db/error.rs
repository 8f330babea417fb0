//! Categorised persistence errors.
//!
//! Every failure surfaced by an entity store carries an [`ErrorCategory`].
//! The record writer only looks at the category to decide whether a failed
//! transaction is worth retrying; message text is for humans.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a persistence operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Unique or foreign key constraint rejected the write
    ConstraintViolation,
    /// Connection loss, deadlock, serialization failure, server shutdown
    Transient,
    /// Pool acquisition or statement timeout
    Timeout,
    /// The database could not interpret a value
    MalformedInput,
    /// Anything not recognised above
    Unknown,
}

impl ErrorCategory {
    /// Constraint violations and malformed input fail the same way on every
    /// attempt; everything else, including unrecognised errors, is retried.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::ConstraintViolation | Self::MalformedInput)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConstraintViolation => "constraint violation",
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::MalformedInput => "malformed input",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistence failure tagged with its [`ErrorCategory`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{category} error: {message}")]
pub struct StoreError {
    pub category: ErrorCategory,
    pub message: String,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ConstraintViolation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::MalformedInput, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(classify(&err), err.to_string())
    }
}

/// Map a driver error onto an [`ErrorCategory`].
pub fn classify(err: &sqlx::Error) -> ErrorCategory {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| category_for_sqlstate(&code))
            .unwrap_or(ErrorCategory::Unknown),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorCategory::Transient,
        sqlx::Error::PoolTimedOut => ErrorCategory::Timeout,
        sqlx::Error::Decode(_)
        | sqlx::Error::Encode(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. } => ErrorCategory::MalformedInput,
        _ => ErrorCategory::Unknown,
    }
}

/// Map a Postgres SQLSTATE code onto an [`ErrorCategory`].
pub fn category_for_sqlstate(code: &str) -> ErrorCategory {
    match code {
        // deadlock_detected, serialization_failure
        "40P01" | "40001" => ErrorCategory::Transient,
        // admin_shutdown, crash_shutdown, cannot_connect_now
        "57P01" | "57P02" | "57P03" => ErrorCategory::Transient,
        // query_canceled (statement_timeout)
        "57014" => ErrorCategory::Timeout,
        _ if code.starts_with("23") => ErrorCategory::ConstraintViolation,
        _ if code.starts_with("22") => ErrorCategory::MalformedInput,
        // connection_exception, insufficient_resources
        _ if code.starts_with("08") || code.starts_with("53") => ErrorCategory::Transient,
        _ => ErrorCategory::Unknown,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classes() {
        assert_eq!(category_for_sqlstate("23505"), ErrorCategory::ConstraintViolation);
        assert_eq!(category_for_sqlstate("23503"), ErrorCategory::ConstraintViolation);
        assert_eq!(category_for_sqlstate("22P02"), ErrorCategory::MalformedInput);
        assert_eq!(category_for_sqlstate("22001"), ErrorCategory::MalformedInput);
        assert_eq!(category_for_sqlstate("40P01"), ErrorCategory::Transient);
        assert_eq!(category_for_sqlstate("40001"), ErrorCategory::Transient);
        assert_eq!(category_for_sqlstate("08006"), ErrorCategory::Transient);
        assert_eq!(category_for_sqlstate("53300"), ErrorCategory::Transient);
        assert_eq!(category_for_sqlstate("57P01"), ErrorCategory::Transient);
        assert_eq!(category_for_sqlstate("57014"), ErrorCategory::Timeout);
        assert_eq!(category_for_sqlstate("42P01"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_retry_policy() {
        assert!(!ErrorCategory::ConstraintViolation.is_retryable());
        assert!(!ErrorCategory::MalformedInput.is_retryable());
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Unknown.is_retryable());
    }

    #[test]
    fn test_driver_errors() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        assert_eq!(classify(&io), ErrorCategory::Transient);
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), ErrorCategory::Timeout);
        assert_eq!(classify(&sqlx::Error::PoolClosed), ErrorCategory::Transient);
        assert_eq!(classify(&sqlx::Error::RowNotFound), ErrorCategory::Unknown);

        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.category, ErrorCategory::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display_includes_category() {
        let err = StoreError::constraint("duplicate key value violates unique constraint");
        assert_eq!(
            err.to_string(),
            "constraint violation error: duplicate key value violates unique constraint"
        );
    }
}
