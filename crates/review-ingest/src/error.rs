//! Ingestion error types

use std::time::Duration;
use thiserror::Error;

use crate::db::{ErrorCategory, StoreError};
use crate::storage::StorageError;

/// Result type alias for file-level ingestion
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Failure of one record write, after retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("{source} (after {attempts} attempt(s))")]
    Store {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("record write did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("record write cancelled")]
    Cancelled,
}

impl WriteError {
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Store { source, .. } => Some(source.category),
            Self::TimedOut(_) => Some(ErrorCategory::Timeout),
            Self::Cancelled => None,
        }
    }
}

/// Errors that abort a whole file, or a whole run.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Cancellation observed; the ledger row stays in `Processing`
    #[error("ingestion cancelled")]
    Cancelled,

    #[error("ledger operation failed for {file}: {source}")]
    Ledger {
        file: String,
        #[source]
        source: StoreError,
    },

    #[error("could not open {file}: {source}")]
    Storage {
        file: String,
        #[source]
        source: StorageError,
    },

    #[error("read failed for {file} at line {line}: {source}")]
    Read {
        file: String,
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
