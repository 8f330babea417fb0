//! Where export files come from.
//!
//! [`FileSource`] lists candidate files and opens them as buffered async
//! readers. [`S3FileSource`] reads `s3://bucket/key` objects and
//! [`LocalFileSource`] reads `file://` paths under a directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncBufRead;

pub mod config;
pub mod local;
pub mod s3;

pub use config::StorageConfig;
pub use local::LocalFileSource;
pub use s3::S3FileSource;

/// Streaming reader over one file's bytes.
pub type FileReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// A file discovered by [`FileSource::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Object key (or path relative to the source root); doubles as the file name
    pub key: String,
    pub size: i64,
    /// Full path handed back to [`FileSource::open_read`]
    pub path: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("storage request failed: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait FileSource: Send + Sync + 'static {
    /// Files whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>, StorageError>;

    async fn open_read(&self, path: &str) -> Result<FileReader, StorageError>;
}

/// Split `s3://bucket/key` into bucket and key.
pub fn parse_s3_path(path: &str) -> Result<(&str, &str), StorageError> {
    let rest = path
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(StorageError::InvalidPath(path.to_string())),
    }
}
