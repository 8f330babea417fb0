//! Processing configuration for the ingestion pipeline.
//!
//! Values come from `INGEST_*` environment variables. Out-of-range values are
//! not fatal: [`ProcessingConfig::sanitize`] puts the default back and logs a
//! warning, so a typo in one knob never stops a scheduled run.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::db::reviews::ReviewRefreshFields;

/// Records per batch before a flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Retries after the first attempt of a record write.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed delay between record write attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Error percentage above which a file stops early.
pub const DEFAULT_MAX_ERRORS_PERCENTAGE: f64 = 10.0;

/// Upper bound on one record write, all attempts included.
pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Lines a file must reach before the error rate is checked.
pub const DEFAULT_CIRCUIT_BREAKER_MIN_LINES: usize = 100;

/// Longest line accepted, in bytes. Longer lines become parse errors.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Files processed at the same time.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_errors_percentage: f64,
    pub record_timeout: Duration,
    pub circuit_breaker_min_lines: usize,
    pub max_line_bytes: usize,
    pub review_refresh_fields: ReviewRefreshFields,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_errors_percentage: DEFAULT_MAX_ERRORS_PERCENTAGE,
            record_timeout: DEFAULT_RECORD_TIMEOUT,
            circuit_breaker_min_lines: DEFAULT_CIRCUIT_BREAKER_MIN_LINES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            review_refresh_fields: ReviewRefreshFields::default(),
        }
    }
}

impl ProcessingConfig {
    /// Load from the environment, then [`sanitize`](Self::sanitize).
    ///
    /// Only an unknown column in `INGEST_REVIEW_REFRESH_FIELDS` is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let review_refresh_fields = match std::env::var("INGEST_REVIEW_REFRESH_FIELDS") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("INGEST_REVIEW_REFRESH_FIELDS: {}", e))?,
            Err(_) => defaults.review_refresh_fields,
        };

        let config = Self {
            batch_size: env_parse("INGEST_BATCH_SIZE").unwrap_or(defaults.batch_size),
            max_retries: env_parse("INGEST_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay: env_parse("INGEST_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            max_errors_percentage: env_parse("INGEST_MAX_ERRORS_PERCENTAGE")
                .unwrap_or(defaults.max_errors_percentage),
            record_timeout: env_parse("INGEST_RECORD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.record_timeout),
            circuit_breaker_min_lines: env_parse("INGEST_CIRCUIT_BREAKER_MIN_LINES")
                .unwrap_or(defaults.circuit_breaker_min_lines),
            max_line_bytes: env_parse("INGEST_MAX_LINE_BYTES").unwrap_or(defaults.max_line_bytes),
            review_refresh_fields,
        };

        Ok(config.sanitize())
    }

    /// Replace out-of-range values with their defaults.
    pub fn sanitize(mut self) -> Self {
        if self.batch_size == 0 {
            warn!(value = self.batch_size, default = DEFAULT_BATCH_SIZE, "Invalid batch size, using default");
            self.batch_size = DEFAULT_BATCH_SIZE;
        }

        if self.retry_delay.is_zero() {
            warn!(default_ms = DEFAULT_RETRY_DELAY.as_millis() as u64, "Invalid retry delay, using default");
            self.retry_delay = DEFAULT_RETRY_DELAY;
        }

        if !(0.0..=100.0).contains(&self.max_errors_percentage) {
            warn!(
                value = self.max_errors_percentage,
                default = DEFAULT_MAX_ERRORS_PERCENTAGE,
                "Invalid max errors percentage, using default"
            );
            self.max_errors_percentage = DEFAULT_MAX_ERRORS_PERCENTAGE;
        }

        if self.record_timeout.is_zero() {
            warn!(default_secs = DEFAULT_RECORD_TIMEOUT.as_secs(), "Invalid record timeout, using default");
            self.record_timeout = DEFAULT_RECORD_TIMEOUT;
        }

        if self.max_line_bytes == 0 {
            warn!(default = DEFAULT_MAX_LINE_BYTES, "Invalid max line length, using default");
            self.max_line_bytes = DEFAULT_MAX_LINE_BYTES;
        }

        self
    }

    /// Whether a file with these counts has exceeded the tolerated error rate.
    pub fn should_trip(&self, total_records: usize, error_records: usize) -> bool {
        if total_records == 0 || total_records < self.circuit_breaker_min_lines {
            return false;
        }
        let error_rate = error_records as f64 / total_records as f64 * 100.0;
        error_rate > self.max_errors_percentage
    }
}

/// Concurrency limit from `INGEST_CONCURRENCY`; zero or garbage gives the default.
pub fn concurrency_from_env() -> usize {
    match env_parse::<usize>("INGEST_CONCURRENCY") {
        Some(0) => {
            warn!(default = DEFAULT_CONCURRENCY, "Invalid concurrency limit, using default");
            DEFAULT_CONCURRENCY
        }
        Some(limit) => limit,
        None => DEFAULT_CONCURRENCY,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = key, value = %raw, "Unparsable value, using default");
            None
        }
    }
}
