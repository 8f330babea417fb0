//! Pipeline tests over a local directory and the in-memory store
//!
//! These run the same orchestrator, processor and writer the binary uses;
//! only the file source and the store are swapped out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use review_ingest::db::models::FileStatus;
use review_ingest::db::StoreError;
use review_ingest::ingest::store::StoreOp;
use review_ingest::ingest::{
    FileLedger, FileProcessor, IngestOrchestrator, LineErrorKind, MemoryStore, ProcessingConfig,
    RunSummary,
};
use review_ingest::storage::{FileSource, LocalFileSource};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const EXPEDIA_REVIEW: &str = r#"{"hotelId":42,"platform":"Agoda","hotelName":"Harbour View","comment":{"hotelReviewId":1001,"providerId":332,"rating":8.4,"reviewComments":"Great location","reviewProviderText":"Expedia","reviewDate":"2025-04-10T05:37:00+07:00","reviewerInfo":{"countryName":"France","flagName":"fr","reviewGroupName":"Couples","lengthOfStay":3}},"overallByProviders":[{"providerId":332,"provider":"Expedia","overallScore":8.1,"reviewCount":120,"grades":{"Cleanliness":8.5,"Location":9.0}}]}"#;

fn review_line(hotel_id: i64, review_id: i64, provider: &str, country: &str) -> String {
    format!(
        r#"{{"hotelId":{hotel_id},"platform":"Agoda","hotelName":"Hotel {hotel_id}","comment":{{"hotelReviewId":{review_id},"rating":7.5,"reviewComments":"ok","reviewProviderText":"{provider}","reviewerInfo":{{"countryName":"{country}","flagName":"xx","reviewGroupName":"Solo"}}}},"overallByProviders":[{{"provider":"{provider}","overallScore":7.9,"reviewCount":10}}]}}"#
    )
}

fn write_file(root: &Path, key: &str, lines: &[String]) {
    let path = root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(path, body).unwrap();
}

fn fast_config() -> ProcessingConfig {
    ProcessingConfig {
        retry_delay: Duration::from_millis(1),
        ..ProcessingConfig::default()
    }
}

async fn run(store: &Arc<MemoryStore>, root: &Path, config: ProcessingConfig) -> RunSummary {
    let source = Arc::new(LocalFileSource::new(root));
    let files = source.list("").await.unwrap();
    let processor = Arc::new(FileProcessor::new(store.clone(), config));
    IngestOrchestrator::new(processor, source)
        .process_all(files, 2, CancellationToken::new())
        .await
}

fn file_path(root: &Path, key: &str) -> String {
    let root = std::fs::canonicalize(root).unwrap();
    format!("file://{}", root.join(key).display())
}

#[tokio::test]
async fn test_single_review_end_to_end() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "2025/04/expedia.jsonl", &[EXPEDIA_REVIEW.to_string()]);
    let store = Arc::new(MemoryStore::new());

    let summary = run(&store, dir.path(), fast_config()).await;

    assert!(summary.is_ok());
    let result = &summary.results["2025/04/expedia.jsonl"];
    assert_eq!(result.status, Some(FileStatus::Success));
    assert_eq!(result.total_records, 1);
    assert_eq!(result.success_records, 1);
    assert_eq!(result.error_records, 0);

    let state = store.snapshot().await;
    assert_eq!(state.hotels[&42].name, "Harbour View");
    let provider = &state.providers["Expedia"];
    let country = &state.countries["France"];
    assert_eq!(country.flag, "fr");

    let review = &state.reviews[&1001];
    assert_eq!(review.hotel_id, 42);
    assert_eq!(review.provider_id, provider.id);
    assert_eq!(review.reviewer_country_id, Some(country.id));
    assert_eq!(review.reviewer_group_id, Some(state.review_groups["Couples"].id));

    let rating = &state.ratings[&(42, provider.id)];
    assert_eq!(rating.scores.overall_score, 8.1);
    assert_eq!(rating.scores.review_count, 120);
    assert_eq!(rating.scores.cleanliness, Some(8.5));
    assert_eq!(rating.scores.facilities, None);

    let entry = store
        .find_entry(&file_path(dir.path(), "2025/04/expedia.jsonl"))
        .await
        .unwrap()
        .expect("ledger entry");
    assert_eq!(entry.status, FileStatus::Success);
    assert_eq!(entry.filename, "2025/04/expedia.jsonl");
    assert_eq!(entry.records_count, 1);
    assert_eq!(entry.errors_count, 0);
}

#[tokio::test]
async fn test_rerun_skips_processed_files() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "a.jsonl",
        &[review_line(1, 10, "Agoda", "Japan"), review_line(1, 11, "Agoda", "Japan")],
    );
    write_file(dir.path(), "b.jsonl", &[review_line(2, 20, "Booking", "Spain")]);
    let store = Arc::new(MemoryStore::new());

    let first = run(&store, dir.path(), fast_config()).await;
    assert_eq!(first.totals().records, 3);
    let before = store.snapshot().await;
    let operations = store.operation_count();

    let second = run(&store, dir.path(), fast_config()).await;

    assert!(second.is_ok());
    let totals = second.totals();
    assert_eq!(totals.files, 2);
    assert_eq!(totals.skipped_files, 2);
    assert_eq!(totals.records, 0);
    assert_eq!(store.snapshot().await, before);
    assert_eq!(store.operation_count(), operations);
}

#[tokio::test]
async fn test_malformed_lines_are_isolated() {
    let dir = TempDir::new().unwrap();
    let lines = vec![
        review_line(5, 50, "Agoda", "Italy"),
        "{not json".to_string(),
        review_line(5, 51, "Agoda", "Italy"),
        r#"{"hotelId":5}"#.to_string(),
        review_line(6, 60, "Expedia", "Italy"),
    ];
    write_file(dir.path(), "mixed.jsonl", &lines);
    let store = Arc::new(MemoryStore::new());

    let summary = run(&store, dir.path(), fast_config()).await;

    let result = &summary.results["mixed.jsonl"];
    assert_eq!(result.status, Some(FileStatus::Partial));
    assert_eq!(result.total_records, 5);
    assert_eq!(result.success_records, 3);
    assert_eq!(result.error_records, 2);

    let failed_lines: Vec<_> = result.errors.iter().map(|e| e.line_number).collect();
    assert_eq!(failed_lines, vec![2, 4]);
    assert!(result.errors.iter().all(|e| e.kind == LineErrorKind::Parse));
    assert_eq!(result.errors[0].raw_line.as_deref(), Some("{not json"));

    let state = store.snapshot().await;
    assert_eq!(state.reviews.len(), 3);
    assert_eq!(state.countries.len(), 1);
    assert_eq!(state.providers.len(), 2);
}

#[tokio::test]
async fn test_shared_entities_resolve_once_across_files() {
    let dir = TempDir::new().unwrap();
    for n in 0..4i64 {
        let lines: Vec<_> = (0..5i64)
            .map(|i| review_line(100 + n, 1000 + n * 100 + i, "Expedia", "France"))
            .collect();
        write_file(dir.path(), &format!("batch-{n}.jsonl"), &lines);
    }
    let store = Arc::new(MemoryStore::new());

    let summary = run(&store, dir.path(), fast_config()).await;

    assert!(summary.is_ok());
    assert_eq!(summary.totals().success_records, 20);
    let state = store.snapshot().await;
    assert_eq!(state.providers.len(), 1);
    assert_eq!(state.countries.len(), 1);
    assert_eq!(state.review_groups.len(), 1);
    assert_eq!(state.hotels.len(), 4);
    assert_eq!(state.reviews.len(), 20);
}

#[tokio::test]
async fn test_failed_writes_leave_no_partial_records() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "ratings.jsonl",
        &[review_line(7, 70, "Agoda", "Peru"), review_line(8, 80, "Agoda", "Peru")],
    );
    let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
        StoreOp::UpsertRating { hotel_id: 8, .. } => {
            Some(StoreError::constraint("rating rejected"))
        },
        _ => None,
    }));

    let summary = run(&store, dir.path(), fast_config()).await;

    let result = &summary.results["ratings.jsonl"];
    assert_eq!(result.status, Some(FileStatus::Partial));
    assert_eq!(result.error_records, 1);
    assert_eq!(result.errors[0].kind, LineErrorKind::Write);
    assert_eq!(result.errors[0].line_number, 2);

    let state = store.snapshot().await;
    assert!(state.reviews.contains_key(&70));
    assert!(!state.reviews.contains_key(&80));
    assert!(!state.hotels.contains_key(&8));
}

#[tokio::test]
async fn test_failed_file_is_retried_on_next_run() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "down.jsonl", &[review_line(9, 90, "Agoda", "Chile")]);

    let broken = Arc::new(MemoryStore::new().with_faults(|op| match op {
        StoreOp::Begin => Some(StoreError::constraint("database unavailable")),
        _ => None,
    }));
    let summary = run(&broken, dir.path(), fast_config()).await;
    assert_eq!(summary.results["down.jsonl"].status, Some(FileStatus::Failed));

    let entry = broken
        .find_entry(&file_path(dir.path(), "down.jsonl"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, FileStatus::Failed);
    assert!(!broken.is_processed(&entry.s3_path).await.unwrap());
}

#[tokio::test]
async fn test_cancelled_run_reports_cancellation() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "late.jsonl", &[review_line(3, 30, "Agoda", "Chile")]);
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(LocalFileSource::new(dir.path()));
    let files = source.list("").await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let processor = Arc::new(FileProcessor::new(store.clone(), fast_config()));
    let summary = IngestOrchestrator::new(processor, source)
        .process_all(files, 1, cancel)
        .await;

    assert!(summary.first_error.as_ref().is_some_and(|e| e.is_cancelled()));
    assert!(store.snapshot().await.reviews.is_empty());
}
