//! Review Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads third-party hotel review exports (JSON Lines files in S3) into
//! PostgreSQL.
//!
//! # Overview
//!
//! - **Storage**: [`storage::FileSource`] lists and streams export files
//!   from S3 or a local directory
//! - **Normalization**: each line becomes a hotel, a review and a provider
//!   rating ([`ingest::normalize`])
//! - **Persistence**: every record is written in its own transaction with
//!   bounded retries ([`ingest::RecordWriter`])
//! - **Ledger**: `processed_files` makes reruns skip files that already
//!   finished
//! - **Orchestration**: files run concurrently under a limit, with
//!   cooperative cancellation ([`ingest::IngestOrchestrator`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use review_ingest::{
//!     config::Config,
//!     db,
//!     ingest::{FileProcessor, IngestOrchestrator, PgStore},
//!     storage::{FileSource, S3FileSource},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = Arc::new(PgStore::new(pool));
//!     let source = S3FileSource::new(config.storage.clone()).await?;
//!     let files = source.list(&config.storage.prefix).await?;
//!
//!     let processor = Arc::new(FileProcessor::new(store, config.processing));
//!     let orchestrator = IngestOrchestrator::new(processor, Arc::new(source));
//!     let summary = orchestrator
//!         .process_all(files, config.concurrency, CancellationToken::new())
//!         .await;
//!     println!("{:?}", summary.totals());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod storage;

// Re-export commonly used types
pub use error::{IngestError, IngestResult, WriteError};
