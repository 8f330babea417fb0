//! Per-file and per-run results.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::db::models::FileStatus;
use crate::error::IngestError;

/// Where a line failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineErrorKind {
    /// The line never became a record
    Parse,
    /// The record could not be persisted
    Write,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingError {
    pub line_number: usize,
    pub kind: LineErrorKind,
    pub message: String,
    /// Original text, kept for parse failures only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
}

/// Outcome of processing one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub total_records: usize,
    pub success_records: usize,
    pub error_records: usize,
    pub errors: Vec<ProcessingError>,
    pub duration: Duration,
    /// Final ledger status; `None` when the file was skipped as already processed
    pub status: Option<FileStatus>,
    pub skipped: bool,
    /// The error-rate circuit breaker stopped the file before end of stream
    pub stopped_early: bool,
}

impl ProcessingResult {
    /// Empty result for a file the ledger already marks as processed.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub(crate) fn record_parse_error(&mut self, line_number: usize, message: String, raw_line: String) {
        self.error_records += 1;
        self.errors.push(ProcessingError {
            line_number,
            kind: LineErrorKind::Parse,
            message,
            raw_line: Some(raw_line),
        });
    }

    pub(crate) fn record_write_error(&mut self, line_number: usize, message: String) {
        self.error_records += 1;
        self.errors.push(ProcessingError {
            line_number,
            kind: LineErrorKind::Write,
            message,
            raw_line: None,
        });
    }
}

/// Aggregate counts over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,
    pub records: usize,
    pub success_records: usize,
    pub error_records: usize,
}

/// Everything a call to `process_all` produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Results keyed by file name, for every file that finished
    pub results: HashMap<String, ProcessingResult>,
    /// First file-level error seen, or `Cancelled` if the run was cancelled
    pub first_error: Option<IngestError>,
}

impl RunSummary {
    pub fn totals(&self) -> RunTotals {
        self.results
            .values()
            .fold(RunTotals::default(), |mut totals, result| {
                totals.files += 1;
                if result.skipped {
                    totals.skipped_files += 1;
                }
                if result.status == Some(FileStatus::Failed) {
                    totals.failed_files += 1;
                }
                totals.records += result.total_records;
                totals.success_records += result.success_records;
                totals.error_records += result.error_records;
                totals
            })
    }

    pub fn is_ok(&self) -> bool {
        self.first_error.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut summary = RunSummary::default();
        summary.results.insert(
            "a.jsonl".to_string(),
            ProcessingResult {
                total_records: 10,
                success_records: 8,
                error_records: 2,
                status: Some(FileStatus::Partial),
                ..ProcessingResult::default()
            },
        );
        summary.results.insert(
            "b.jsonl".to_string(),
            ProcessingResult {
                total_records: 3,
                error_records: 3,
                status: Some(FileStatus::Failed),
                ..ProcessingResult::default()
            },
        );
        summary
            .results
            .insert("c.jsonl".to_string(), ProcessingResult::skipped());

        let totals = summary.totals();
        assert_eq!(totals.files, 3);
        assert_eq!(totals.skipped_files, 1);
        assert_eq!(totals.failed_files, 1);
        assert_eq!(totals.records, 13);
        assert_eq!(totals.success_records, 8);
        assert_eq!(totals.error_records, 5);
        assert!(summary.is_ok());
    }

    #[test]
    fn test_write_errors_drop_raw_line() {
        let mut result = ProcessingResult::default();
        result.record_parse_error(1, "JSON parse error".to_string(), "{oops".to_string());
        result.record_write_error(2, "constraint violation".to_string());

        assert_eq!(result.error_records, 2);
        assert_eq!(result.errors[0].raw_line.as_deref(), Some("{oops"));
        assert_eq!(result.errors[1].kind, LineErrorKind::Write);
        assert!(result.errors[1].raw_line.is_none());
    }
}
