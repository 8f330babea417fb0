use serde::{Deserialize, Serialize};
use std::env;

/// Default region of the review export bucket.
pub const DEFAULT_REGION: &str = "ap-southeast-2";

/// Default bucket holding the review exports.
pub const DEFAULT_BUCKET: &str = "zuzuhotelreview1";

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Key prefix listed by default
    pub prefix: String,
    /// Static credentials; when absent the default AWS credential chain is used
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            prefix: String::new(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());

        Self {
            endpoint: non_empty("S3_ENDPOINT"),
            region: non_empty("S3_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: non_empty("S3_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            prefix: env::var("S3_PREFIX").unwrap_or_default(),
            access_key: non_empty("S3_ACCESS_KEY").or_else(|| non_empty("AWS_ACCESS_KEY_ID")),
            secret_key: non_empty("S3_SECRET_KEY").or_else(|| non_empty("AWS_SECRET_ACCESS_KEY")),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Static credentials, when both halves are configured.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.trim().is_empty() {
            anyhow::bail!("S3_BUCKET cannot be empty");
        }
        if self.region.trim().is_empty() {
            anyhow::bail!("S3_REGION cannot be empty");
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            anyhow::bail!("S3 access key and secret key must be set together");
        }
        Ok(())
    }
}
