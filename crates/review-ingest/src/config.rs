//! Configuration management

use crate::db::DbConfig;
use crate::ingest::config::{concurrency_from_env, ProcessingConfig, DEFAULT_CONCURRENCY};
use crate::storage::StorageConfig;

/// Everything the `review-ingest` binary reads from its environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub storage: StorageConfig,
    pub processing: ProcessingConfig,
    /// Files processed at the same time
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DbConfig::default(),
            storage: StorageConfig::default(),
            processing: ProcessingConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DbConfig::from_env(),
            storage: StorageConfig::from_env(),
            processing: ProcessingConfig::from_env()?,
            concurrency: concurrency_from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.validate()?;
        self.storage.validate()?;

        if self.concurrency == 0 {
            anyhow::bail!("Concurrency limit must be greater than 0");
        }

        Ok(())
    }
}
