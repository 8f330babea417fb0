//! Streams one export file through normalization and the record writer.
//!
//! Ledger lifecycle per file:
//!
//! ```text
//! (absent | Failed | Processing) --create--> Processing --finish--> Success | Partial | Failed
//! ```
//!
//! A file the ledger already marks `Success` or `Partial` is skipped without
//! reading a line. Cancellation and read errors abort the file and leave its
//! row in `Processing`, so the next run picks it up again.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::ProcessingConfig;
use super::normalize::{parse_line, NormalizedRecord};
use super::store::{EntityStore, FileLedger};
use super::types::ProcessingResult;
use super::writer::RecordWriter;
use crate::db::models::{FileOutcome, FileStatus, NewProcessedFile};
use crate::error::{IngestError, IngestResult, WriteError};
use crate::storage::FileInfo;

/// Bytes of an oversized line kept as its raw text.
const PREVIEW_BYTES: usize = 256;

struct LineRead {
    /// Bytes taken off the reader, newline included
    consumed: usize,
    /// Content was longer than the limit; only a prefix is in the buffer
    oversized: bool,
}

/// Read up to and including the next `\n`, buffering at most `limit` bytes of
/// content. The rest of an oversized line is consumed and dropped.
async fn read_line_capped<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0;
    let mut content_len = 0;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        content_len += used - usize::from(done);

        let room = (limit + 1).saturating_sub(buf.len());
        buf.extend_from_slice(&available[..used.min(room)]);
        reader.consume(used);
        consumed += used;

        if done {
            break;
        }
    }

    Ok(LineRead {
        consumed,
        oversized: content_len > limit,
    })
}

struct PendingRecord {
    line_number: usize,
    record: NormalizedRecord,
}

pub struct FileProcessor<S> {
    store: Arc<S>,
    writer: RecordWriter<S>,
    config: ProcessingConfig,
}

impl<S> FileProcessor<S>
where
    S: EntityStore + FileLedger,
{
    pub fn new(store: Arc<S>, config: ProcessingConfig) -> Self {
        let writer = RecordWriter::new(store.clone(), &config);
        Self {
            store,
            writer,
            config,
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    #[instrument(skip(self, reader, cancel), fields(file = %file.key))]
    pub async fn process<R>(
        &self,
        reader: R,
        file: &FileInfo,
        cancel: &CancellationToken,
    ) -> IngestResult<ProcessingResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let ledger_error = |source| IngestError::Ledger {
            file: file.key.clone(),
            source,
        };

        if self.store.is_processed(&file.path).await.map_err(ledger_error)? {
            info!(path = %file.path, "File already processed, skipping");
            return Ok(ProcessingResult::skipped());
        }

        let entry = self
            .store
            .create_entry(&NewProcessedFile {
                filename: file.key.clone(),
                s3_path: file.path.clone(),
                processed_at: Utc::now(),
            })
            .await
            .map_err(ledger_error)?;

        info!(path = %file.path, ledger_id = entry.id, "Processing file");

        let started = Instant::now();
        let mut result = self.stream(reader, file, cancel).await?;
        result.duration = started.elapsed();

        let status = FileStatus::from_counts(result.success_records, result.error_records);
        result.status = Some(status);

        let outcome = FileOutcome {
            records_count: i32::try_from(result.success_records).unwrap_or(i32::MAX),
            errors_count: i32::try_from(result.error_records).unwrap_or(i32::MAX),
            status,
        };
        if let Err(err) = self.store.update_entry(entry.id, &outcome).await {
            warn!(ledger_id = entry.id, error = %err, "Failed to update processed file record");
        }

        info!(
            total = result.total_records,
            success = result.success_records,
            errors = result.error_records,
            status = %status,
            duration_ms = result.duration.as_millis() as u64,
            stopped_early = result.stopped_early,
            "Finished processing file"
        );

        Ok(result)
    }

    async fn stream<R>(
        &self,
        mut reader: R,
        file: &FileInfo,
        cancel: &CancellationToken,
    ) -> IngestResult<ProcessingResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut result = ProcessingResult::default();
        let mut batch = Vec::with_capacity(self.config.batch_size);
        let mut buf = Vec::new();
        let mut line_number = 0usize;

        loop {
            if cancel.is_cancelled() {
                warn!(line = line_number, "Cancelled while reading file");
                return Err(IngestError::Cancelled);
            }

            buf.clear();
            let read = read_line_capped(&mut reader, &mut buf, self.config.max_line_bytes)
                .await
                .map_err(|source| IngestError::Read {
                    file: file.key.clone(),
                    line: line_number + 1,
                    source,
                })?;
            if read.consumed == 0 {
                break;
            }
            line_number += 1;

            if read.oversized {
                result.total_records += 1;
                result.record_parse_error(
                    line_number,
                    format!("line exceeds {} bytes", self.config.max_line_bytes),
                    String::from_utf8_lossy(&buf[..buf.len().min(PREVIEW_BYTES)]).into_owned(),
                );
                continue;
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(text) => text.trim_end_matches(['\n', '\r']),
                Err(err) => {
                    result.total_records += 1;
                    result.record_parse_error(
                        line_number,
                        format!("invalid UTF-8: {}", err),
                        String::from_utf8_lossy(&buf).trim_end().to_string(),
                    );
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            result.total_records += 1;
            match parse_line(line) {
                Ok(record) => batch.push(PendingRecord {
                    line_number,
                    record,
                }),
                Err(err) => {
                    debug!(line = line_number, error = %err, "Skipping unparsable line");
                    result.record_parse_error(line_number, err.to_string(), line.to_string());
                }
            }

            if batch.len() >= self.config.batch_size {
                self.flush(&mut batch, &mut result, cancel).await?;

                if self
                    .config
                    .should_trip(result.total_records, result.error_records)
                {
                    warn!(
                        total = result.total_records,
                        errors = result.error_records,
                        max_errors_percentage = self.config.max_errors_percentage,
                        "Error rate exceeded threshold, stopping file"
                    );
                    result.stopped_early = true;
                    return Ok(result);
                }
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &mut result, cancel).await?;
        }

        Ok(result)
    }

    async fn flush(
        &self,
        batch: &mut Vec<PendingRecord>,
        result: &mut ProcessingResult,
        cancel: &CancellationToken,
    ) -> IngestResult<()> {
        debug!(records = batch.len(), "Flushing batch");

        for pending in batch.drain(..) {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            match self.writer.write(&pending.record, cancel).await {
                Ok(()) => result.success_records += 1,
                Err(WriteError::Cancelled) => return Err(IngestError::Cancelled),
                Err(err) => {
                    warn!(
                        line = pending.line_number,
                        hotel_id = pending.record.hotel.hotel_id,
                        error = %err,
                        "Failed to write record"
                    );
                    result.record_write_error(
                        pending.line_number,
                        format!(
                            "processing error for hotel {}: {}",
                            pending.record.hotel.hotel_id, err
                        ),
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::StoreError;
    use crate::ingest::store::{MemoryStore, StoreOp};
    use crate::ingest::types::LineErrorKind;
    use std::time::Duration;

    fn line(hotel_id: i64, review_id: i64) -> String {
        format!(
            r#"{{"hotelId":{hotel_id},"platform":"Agoda","hotelName":"Hotel {hotel_id}","comment":{{"hotelReviewId":{review_id},"rating":7.5,"reviewProviderText":"Agoda"}}}}"#
        )
    }

    fn file(key: &str) -> FileInfo {
        FileInfo {
            key: key.to_string(),
            size: 0,
            path: format!("s3://reviews/{}", key),
            last_modified: None,
        }
    }

    fn processor(store: &Arc<MemoryStore>, config: ProcessingConfig) -> FileProcessor<MemoryStore> {
        FileProcessor::new(store.clone(), config)
    }

    fn fast_config() -> ProcessingConfig {
        ProcessingConfig {
            batch_size: 10,
            retry_delay: Duration::from_millis(1),
            max_retries: 0,
            ..ProcessingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_error_isolation() {
        let store = Arc::new(MemoryStore::new());
        let mut content = String::new();
        for i in 0..5 {
            content.push_str(&line(1, 100 + i));
            content.push('\n');
        }
        content.push_str("{not json\n");
        content.push_str("{\"hotelId\": 1}\n");
        content.push_str(&line(2, 200));

        let result = processor(&store, fast_config())
            .process(content.as_bytes(), &file("mixed.jsonl"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_records, 8);
        assert_eq!(result.success_records, 6);
        assert_eq!(result.error_records, 2);
        assert_eq!(result.status, Some(FileStatus::Partial));
        let lines: Vec<_> = result.errors.iter().map(|e| e.line_number).collect();
        assert_eq!(lines, vec![6, 7]);
        assert!(result.errors.iter().all(|e| e.kind == LineErrorKind::Parse));
        assert_eq!(result.errors[0].raw_line.as_deref(), Some("{not json"));
        assert_eq!(store.snapshot().await.reviews.len(), 6);
    }

    #[tokio::test]
    async fn test_idempotent_rerun() {
        let store = Arc::new(MemoryStore::new());
        let content = format!("{}\n{}\n", line(1, 1), line(1, 2));
        let processor = processor(&store, fast_config());
        let info = file("daily.jsonl");
        let cancel = CancellationToken::new();

        let first = processor.process(content.as_bytes(), &info, &cancel).await.unwrap();
        assert_eq!(first.status, Some(FileStatus::Success));
        let ops = store.operation_count();

        let second = processor.process(content.as_bytes(), &info, &cancel).await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.total_records, 0);
        assert_eq!(store.operation_count(), ops);
    }

    #[tokio::test]
    async fn test_empty_file_is_success() {
        let store = Arc::new(MemoryStore::new());
        let info = file("empty.jsonl");

        let result = processor(&store, fast_config())
            .process(&b"\n  \n"[..], &info, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_records, 0);
        assert_eq!(result.status, Some(FileStatus::Success));
        let entry = store.find_entry(&info.path).await.unwrap().unwrap();
        assert_eq!(entry.status, FileStatus::Success);
    }

    #[tokio::test]
    async fn test_circuit_breaker_stops_file() {
        // reviews 1..=120 fail to persist, 121..=150 would succeed
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::UpsertReview { hotel_review_id } if *hotel_review_id <= 120 => {
                Some(StoreError::constraint("duplicate key value violates unique constraint"))
            }
            _ => None,
        }));
        let content: String = (1..=150).map(|i| format!("{}\n", line(7, i))).collect();
        let info = file("broken.jsonl");

        let result = processor(&store, fast_config())
            .process(content.as_bytes(), &info, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.stopped_early);
        assert_eq!(result.total_records, 100);
        assert_eq!(result.success_records, 0);
        assert_eq!(result.status, Some(FileStatus::Failed));
        assert!(result.errors.iter().all(|e| e.kind == LineErrorKind::Write));
        assert!(result.errors.iter().all(|e| e.raw_line.is_none()));

        let entry = store.find_entry(&info.path).await.unwrap().unwrap();
        assert_eq!(entry.status, FileStatus::Failed);
        assert_eq!(entry.errors_count, 100);
    }

    #[tokio::test]
    async fn test_circuit_breaker_after_some_successes_is_partial() {
        // reviews 1..=80 persist, everything after fails
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::UpsertReview { hotel_review_id } if *hotel_review_id > 80 => {
                Some(StoreError::constraint("check constraint violated"))
            }
            _ => None,
        }));
        let content: String = (1..=150).map(|i| format!("{}\n", line(7, i))).collect();
        let info = file("degraded.jsonl");

        let result = processor(&store, fast_config())
            .process(content.as_bytes(), &info, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.stopped_early);
        assert_eq!(result.total_records, 100);
        assert_eq!(result.success_records, 80);
        assert_eq!(result.error_records, 20);
        assert_eq!(result.status, Some(FileStatus::Partial));
        assert_eq!(store.snapshot().await.reviews.len(), 80);

        let entry = store.find_entry(&info.path).await.unwrap().unwrap();
        assert_eq!(entry.status, FileStatus::Partial);
        assert_eq!(entry.records_count, 80);
        assert_eq!(entry.errors_count, 20);
        assert!(store.is_processed(&info.path).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_line_is_a_parse_error() {
        let store = Arc::new(MemoryStore::new());
        let valid = line(1, 1);
        let config = ProcessingConfig {
            max_line_bytes: valid.len(),
            ..fast_config()
        };
        let mut content = "x".repeat(10_000);
        content.push('\n');
        content.push_str(&valid);
        content.push('\n');
        content.push_str(&line(1, 2));
        content.push_str("  \n");

        // small reader buffer so lines span several fills
        let reader = tokio::io::BufReader::with_capacity(16, content.as_bytes());
        let result = processor(&store, config)
            .process(reader, &file("huge.jsonl"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_records, 3);
        assert_eq!(result.success_records, 1);
        assert_eq!(result.error_records, 2);
        let lines: Vec<_> = result.errors.iter().map(|e| e.line_number).collect();
        assert_eq!(lines, vec![1, 3]);
        assert!(result.errors.iter().all(|e| e.kind == LineErrorKind::Parse));
        assert!(result.errors[0].message.contains("exceeds"));
        let preview = result.errors[0].raw_line.as_deref().unwrap();
        assert!(!preview.is_empty() && preview.len() <= PREVIEW_BYTES);
        assert!(preview.chars().all(|c| c == 'x'));
        assert!(store.snapshot().await.reviews.contains_key(&1));
    }

    #[tokio::test]
    async fn test_failed_file_is_retried_next_run() {
        let store = Arc::new(MemoryStore::new());
        let info = file("retry.jsonl");
        let cancel = CancellationToken::new();
        let processor = processor(&store, fast_config());

        let first = processor.process(&b"garbage\n"[..], &info, &cancel).await.unwrap();
        assert_eq!(first.status, Some(FileStatus::Failed));

        let content = line(3, 30);
        let second = processor.process(content.as_bytes(), &info, &cancel).await.unwrap();
        assert!(!second.skipped);
        assert_eq!(second.status, Some(FileStatus::Success));
    }

    #[tokio::test]
    async fn test_cancelled_file_stays_processing() {
        let store = Arc::new(MemoryStore::new());
        let info = file("cancelled.jsonl");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = processor(&store, fast_config())
            .process(line(1, 1).as_bytes(), &info, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        let entry = store.find_entry(&info.path).await.unwrap().unwrap();
        assert_eq!(entry.status, FileStatus::Processing);
        assert!(!store.is_processed(&info.path).await.unwrap());
    }

    #[tokio::test]
    async fn test_ledger_create_failure_aborts_file() {
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::CreateEntry { .. } => Some(StoreError::transient("connection refused")),
            _ => None,
        }));

        let err = processor(&store, fast_config())
            .process(line(1, 1).as_bytes(), &file("x.jsonl"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Ledger { .. }));
        assert!(store.snapshot().await.hotels.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_update_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::UpdateEntry { .. } => Some(StoreError::transient("connection reset")),
            _ => None,
        }));

        let result = processor(&store, fast_config())
            .process(line(1, 1).as_bytes(), &file("y.jsonl"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success_records, 1);
        assert_eq!(result.status, Some(FileStatus::Success));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_line_error() {
        let store = Arc::new(MemoryStore::new());
        let mut content = vec![0xff, 0xfe, b'\n'];
        content.extend_from_slice(line(1, 1).as_bytes());

        let result = processor(&store, fast_config())
            .process(&content[..], &file("bytes.jsonl"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_records, 2);
        assert_eq!(result.error_records, 1);
        assert_eq!(result.errors[0].line_number, 1);
        assert!(result.errors[0].message.starts_with("invalid UTF-8"));
    }
}
