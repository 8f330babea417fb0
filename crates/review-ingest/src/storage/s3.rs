use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::DateTime as S3DateTime,
    Client,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use super::{parse_s3_path, FileInfo, FileReader, FileSource, StorageConfig, StorageError};

/// Export files stored as S3 objects.
#[derive(Clone)]
pub struct S3FileSource {
    client: Client,
    bucket: String,
}

impl S3FileSource {
    pub async fn new(config: StorageConfig) -> Result<Self, StorageError> {
        debug!("Initializing S3 file source with config: {:?}", config);

        let mut builder = match config.static_credentials() {
            Some((access_key, secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "review-ingest");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            }
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, region = %config.region, "S3 file source initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl FileSource for S3FileSource {
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        let mut files = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|err| storage_error(err, &format!("s3://{}/{}", self.bucket, prefix)))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                // "directory" placeholders
                if key.ends_with('/') {
                    continue;
                }
                files.push(FileInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0),
                    path: format!("s3://{}/{}", self.bucket, key),
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        files.sort_by(|a, b| a.key.cmp(&b.key));
        info!(count = files.len(), "Listed files in s3://{}/{}", self.bucket, prefix);

        Ok(files)
    }

    #[instrument(skip(self))]
    async fn open_read(&self, path: &str) -> Result<FileReader, StorageError> {
        let (bucket, key) = parse_s3_path(path)?;

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| storage_error(err, path))?;

        debug!(content_length = ?response.content_length(), "Opened {}", path);

        Ok(Box::new(Box::pin(response.body.into_async_read())))
    }
}

fn storage_error<E, R>(err: SdkError<E, R>, target: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_owned);
    match code.as_deref() {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound") => StorageError::NotFound(target.to_string()),
        Some("AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            StorageError::AccessDenied(target.to_string())
        }
        _ => StorageError::Transport(format!("{}: {}", target, DisplayErrorContext(&err))),
    }
}

fn to_chrono(value: &S3DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion() {
        let ts = S3DateTime::from_secs(1_744_246_620);
        let converted = to_chrono(&ts).unwrap();
        assert_eq!(converted.to_rfc3339(), "2025-04-10T00:57:00+00:00");
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_scheme() {
        let source = S3FileSource::new(StorageConfig {
            access_key: Some("test".to_string()),
            secret_key: Some("test".to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            path_style: true,
            ..StorageConfig::default()
        })
        .await
        .unwrap();

        assert_eq!(source.bucket(), "zuzuhotelreview1");
        let err = source.open_read("file:///tmp/a.jsonl").await.err().unwrap();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }
}
