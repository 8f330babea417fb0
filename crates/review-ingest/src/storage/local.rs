use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::BufReader;
use tracing::{info, instrument};

use super::{FileInfo, FileReader, FileSource, StorageError};

const SCHEME: &str = "file://";

/// Export files in a local directory tree. Keys are `/`-separated paths
/// relative to the root.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    root: PathBuf,
}

impl LocalFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn walk(&self) -> Result<Vec<(String, PathBuf, std::fs::Metadata)>, StorageError> {
        let root = fs::canonicalize(&self.root)
            .await
            .map_err(|err| map_io(err, &self.root))?;
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|err| map_io(err, &dir))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                found.push((key, path, metadata));
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl FileSource for LocalFileSource {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        let mut files: Vec<FileInfo> = self
            .walk()
            .await?
            .into_iter()
            .filter(|(key, _, _)| key.starts_with(prefix))
            .map(|(key, path, metadata)| FileInfo {
                key,
                size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
                path: format!("{}{}", SCHEME, path.display()),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            })
            .collect();

        files.sort_by(|a, b| a.key.cmp(&b.key));
        info!(count = files.len(), "Listed local files");

        Ok(files)
    }

    async fn open_read(&self, path: &str) -> Result<FileReader, StorageError> {
        let local = path
            .strip_prefix(SCHEME)
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        let file = fs::File::open(local)
            .await
            .map_err(|err| map_io(err, Path::new(local)))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn map_io(err: std::io::Error, path: &Path) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => StorageError::AccessDenied(path.display().to_string()),
        _ => StorageError::Io(err),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[tokio::test]
    async fn test_list_and_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2025/04")).unwrap();
        std::fs::write(dir.path().join("2025/04/agoda.jsonl"), "{\"a\":1}\n{\"b\":2}\n").unwrap();
        std::fs::write(dir.path().join("2025/04/booking.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignore me").unwrap();

        let source = LocalFileSource::new(dir.path());

        let all = source.list("").await.unwrap();
        let keys: Vec<_> = all.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["2025/04/agoda.jsonl", "2025/04/booking.jsonl", "readme.txt"]);

        let april = source.list("2025/04/").await.unwrap();
        assert_eq!(april.len(), 2);
        assert!(april[0].path.starts_with("file://"));
        assert_eq!(april[0].size, 16);

        let mut lines = source.open_read(&april[0].path).await.unwrap().lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalFileSource::new(dir.path());
        let path = format!("file://{}", dir.path().join("missing.jsonl").display());

        let err = source.open_read(&path).await.err().unwrap();
        assert!(matches!(err, StorageError::NotFound(_)));

        let err = source.open_read("s3://bucket/key").await.err().unwrap();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_missing_root() {
        let source = LocalFileSource::new("/definitely/not/here");
        assert!(matches!(
            source.list("").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
