//! Review ingestion pipeline
//!
//! # Architecture
//!
//! - **models**: Raw JSON shape of one export line
//! - **normalize**: Line to [`NormalizedRecord`] conversion
//! - **writer**: Per-record transaction with retry and timeout
//! - **processor**: Streams one file, batches records and keeps the ledger
//! - **orchestrator**: Runs many files under a concurrency limit
//! - **store**: Persistence traits plus Postgres and in-memory backends
//! - **config**: `INGEST_*` tuning knobs

pub mod config;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod processor;
pub mod store;
pub mod types;
pub mod writer;

pub use config::ProcessingConfig;
pub use normalize::{normalize, parse_line, NormalizeError, NormalizedRecord};
pub use orchestrator::IngestOrchestrator;
pub use processor::FileProcessor;
pub use store::{EntityStore, EntityTx, FileLedger, MemoryStore, PgStore};
pub use types::{LineErrorKind, ProcessingError, ProcessingResult, RunSummary, RunTotals};
pub use writer::RecordWriter;
