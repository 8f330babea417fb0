//! Runs the file processor over a set of files with bounded parallelism.
//!
//! Every file gets its own task. A semaphore decides how many of them may
//! open and stream a file at once; the tasks report through two channels to a
//! single collector, which builds the [`RunSummary`]. One failing file never
//! stops its siblings.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::processor::FileProcessor;
use super::store::{EntityStore, FileLedger};
use super::types::{ProcessingResult, RunSummary};
use crate::error::{IngestError, IngestResult};
use crate::storage::{FileInfo, FileSource};

pub struct IngestOrchestrator<S> {
    processor: Arc<FileProcessor<S>>,
    source: Arc<dyn FileSource>,
}

impl<S> Clone for IngestOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            source: self.source.clone(),
        }
    }
}

impl<S> IngestOrchestrator<S>
where
    S: EntityStore + FileLedger,
{
    pub fn new(processor: Arc<FileProcessor<S>>, source: Arc<dyn FileSource>) -> Self {
        Self { processor, source }
    }

    /// Process every file, at most `concurrency_limit` at a time.
    ///
    /// Returns once each file has reported, or as soon as `cancel` fires; in
    /// the latter case the summary holds what finished so far and
    /// `first_error` is [`IngestError::Cancelled`].
    pub async fn process_all(
        &self,
        files: Vec<FileInfo>,
        concurrency_limit: usize,
        cancel: CancellationToken,
    ) -> RunSummary {
        let total = files.len();
        let limit = concurrency_limit.max(1);
        if concurrency_limit == 0 {
            warn!("Concurrency limit of 0 requested, using 1");
        }

        info!(files = total, concurrency = limit, "Starting ingestion run");

        let mut summary = RunSummary::default();
        if total == 0 {
            return summary;
        }

        let semaphore = Arc::new(Semaphore::new(limit));
        let (result_tx, mut result_rx) = mpsc::channel::<(String, ProcessingResult)>(total);
        let (error_tx, mut error_rx) = mpsc::channel::<IngestError>(total);

        for file in files {
            let span = info_span!("file", key = %file.key);
            let processor = self.processor.clone();
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let result_tx = result_tx.clone();
            let error_tx = error_tx.clone();

            tokio::spawn(
                async move {
                    match run_file(&processor, source.as_ref(), &semaphore, &file, &cancel).await {
                        Ok(result) => {
                            let _ = result_tx.send((file.key, result)).await;
                        }
                        Err(err) => {
                            let _ = error_tx.send(err).await;
                        }
                    }
                }
                .instrument(span),
            );
        }
        drop(result_tx);
        drop(error_tx);

        let mut reported = 0usize;
        let mut results_open = true;
        let mut errors_open = true;

        while reported < total && (results_open || errors_open) {
            tokio::select! {
                received = result_rx.recv(), if results_open => match received {
                    Some((key, result)) => {
                        summary.results.insert(key, result);
                        reported += 1;
                    }
                    None => results_open = false,
                },
                received = error_rx.recv(), if errors_open => match received {
                    Some(err) => {
                        error!(error = %err, "File failed");
                        if summary.first_error.is_none() {
                            summary.first_error = Some(err);
                        }
                        reported += 1;
                    }
                    None => errors_open = false,
                },
                _ = cancel.cancelled() => {
                    warn!(reported, total, "Ingestion run cancelled");
                    if let Some(previous) = summary.first_error.replace(IngestError::Cancelled) {
                        if !previous.is_cancelled() {
                            warn!(error = %previous, "Earlier file error superseded by cancellation");
                        }
                    }
                    return summary;
                }
            }
        }

        if reported < total {
            error!(reported, total, "Some file tasks ended without reporting");
        }

        let totals = summary.totals();
        info!(
            files = totals.files,
            skipped = totals.skipped_files,
            records = totals.records,
            success = totals.success_records,
            errors = totals.error_records,
            "Ingestion run finished"
        );

        summary
    }
}

async fn run_file<S>(
    processor: &FileProcessor<S>,
    source: &dyn FileSource,
    semaphore: &Semaphore,
    file: &FileInfo,
    cancel: &CancellationToken,
) -> IngestResult<ProcessingResult>
where
    S: EntityStore + FileLedger,
{
    let _permit = tokio::select! {
        permit = semaphore.acquire() => permit.map_err(|_| IngestError::Cancelled)?,
        _ = cancel.cancelled() => return Err(IngestError::Cancelled),
    };

    let reader = source
        .open_read(&file.path)
        .await
        .map_err(|source| IngestError::Storage {
            file: file.key.clone(),
            source,
        })?;

    processor.process(reader, file, cancel).await
}
