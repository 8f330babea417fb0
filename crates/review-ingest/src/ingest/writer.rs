//! Writes one normalized record inside a single transaction.
//!
//! Order inside the transaction: hotel, review provider, reviewer country,
//! reviewer group, review, then each provider rating. A failed attempt is
//! rolled back and, when its error is retryable, the whole transaction is
//! replayed from the hotel after `retry_delay`.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::config::ProcessingConfig;
use super::normalize::NormalizedRecord;
use super::store::{EntityStore, EntityTx};
use crate::db::models::{NewHotelProviderRating, NewReview};
use crate::db::reviews::ReviewRefreshFields;
use crate::db::StoreResult;
use crate::error::WriteError;

pub struct RecordWriter<S> {
    store: Arc<S>,
    max_retries: u32,
    retry_delay: Duration,
    record_timeout: Duration,
    refresh: ReviewRefreshFields,
}

impl<S: EntityStore> RecordWriter<S> {
    pub fn new(store: Arc<S>, config: &ProcessingConfig) -> Self {
        Self {
            store,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            record_timeout: config.record_timeout,
            refresh: config.review_refresh_fields.clone(),
        }
    }

    /// Persist `record`, retrying transient failures.
    ///
    /// Cancellation is only observed between attempts; an attempt that has
    /// started runs to commit or rollback.
    #[instrument(
        skip_all,
        fields(
            hotel_id = record.hotel.hotel_id,
            hotel_review_id = record.review.hotel_review_id
        )
    )]
    pub async fn write(
        &self,
        record: &NormalizedRecord,
        cancel: &CancellationToken,
    ) -> Result<(), WriteError> {
        match tokio::time::timeout(self.record_timeout, self.write_with_retry(record, cancel)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.record_timeout, "Record write timed out");
                Err(WriteError::TimedOut(self.record_timeout))
            }
        }
    }

    async fn write_with_retry(
        &self,
        record: &NormalizedRecord,
        cancel: &CancellationToken,
    ) -> Result<(), WriteError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match self.attempt(record).await {
                Ok(()) => {
                    debug!(attempts, "Record written");
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempts > self.max_retries {
                return Err(WriteError::Store {
                    attempts,
                    source: err,
                });
            }

            warn!(
                attempt = attempts,
                max_retries = self.max_retries,
                category = %err.category,
                error = %err.message,
                "Record write failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(WriteError::Cancelled),
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    async fn attempt(&self, record: &NormalizedRecord) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        match apply(&mut tx, record, &self.refresh).await {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

async fn apply<T: EntityTx>(
    tx: &mut T,
    record: &NormalizedRecord,
    refresh: &ReviewRefreshFields,
) -> StoreResult<()> {
    let hotel_id = record.hotel.hotel_id;
    tx.upsert_hotel(&record.hotel).await?;

    let review = &record.review;
    let provider = tx.create_or_get_provider(&review.provider_name).await?;

    let country_id = match &review.country {
        Some(country) => Some(
            tx.create_or_get_country(&country.name, &country.flag)
                .await?
                .row
                .id,
        ),
        None => None,
    };

    let group_id = match &review.review_group {
        Some(name) => Some(tx.create_or_get_review_group(name).await?.row.id),
        None => None,
    };

    tx.upsert_review(
        &NewReview {
            hotel_review_id: review.hotel_review_id,
            hotel_id,
            provider_id: provider.row.id,
            reviewer_country_id: country_id,
            reviewer_group_id: group_id,
            content: &review.content,
        },
        refresh,
    )
    .await?;

    for rating in &record.ratings {
        let provider = tx.create_or_get_provider(&rating.provider_name).await?;
        tx.upsert_rating(&NewHotelProviderRating {
            hotel_id,
            provider_id: provider.row.id,
            provider_name: &provider.row.name,
            scores: &rating.scores,
        })
        .await?;
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::{ErrorCategory, StoreError};
    use crate::ingest::normalize::parse_line;
    use crate::ingest::store::{MemoryStore, StoreOp};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LINE: &str = r#"{"hotelId":42,"platform":"Agoda","hotelName":"Harbour View","comment":{"hotelReviewId":1001,"rating":8.4,"reviewComments":"Great","reviewProviderText":"Expedia","reviewerInfo":{"countryName":"France","flagName":"fr"}},"overallByProviders":[{"provider":"Expedia","overallScore":8.1,"reviewCount":120}]}"#;

    fn config() -> ProcessingConfig {
        ProcessingConfig {
            retry_delay: Duration::from_millis(10),
            ..ProcessingConfig::default()
        }
    }

    /// Fails the first `n` matching operations with `err`.
    fn fail_first(
        n: usize,
        matches: fn(&StoreOp) -> bool,
        err: StoreError,
    ) -> impl Fn(&StoreOp) -> Option<StoreError> + Send + Sync + 'static {
        let seen = AtomicUsize::new(0);
        move |op| {
            if matches(op) && seen.fetch_add(1, Ordering::SeqCst) < n {
                Some(err.clone())
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn test_write_persists_entity_graph() {
        let store = Arc::new(MemoryStore::new());
        let writer = RecordWriter::new(store.clone(), &config());

        writer
            .write(&parse_line(LINE).unwrap(), &CancellationToken::new())
            .await
            .unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.hotels.len(), 1);
        assert_eq!(state.providers.len(), 1);
        assert_eq!(state.countries.len(), 1);
        assert!(state.review_groups.is_empty());
        let review = &state.reviews[&1001];
        assert_eq!(review.hotel_id, 42);
        assert_eq!(review.reviewer_country_id, Some(state.countries["France"].id));
        assert_eq!(review.reviewer_group_id, None);
        assert_eq!(state.ratings.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(MemoryStore::new().with_faults(fail_first(
            2,
            |op| matches!(op, StoreOp::UpsertReview { .. }),
            StoreError::transient("deadlock detected"),
        )));
        let writer = RecordWriter::new(store.clone(), &config());

        writer
            .write(&parse_line(LINE).unwrap(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.snapshot().await.reviews.len(), 1);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_not_retried() {
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::UpsertHotel { .. } => Some(StoreError::constraint("duplicate key value")),
            _ => None,
        }));
        let writer = RecordWriter::new(store.clone(), &config());

        let err = writer
            .write(&parse_line(LINE).unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::Store { attempts: 1, .. }));
        assert_eq!(err.category(), Some(ErrorCategory::ConstraintViolation));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::Commit => Some(StoreError::unknown("server closed the connection")),
            _ => None,
        }));
        let writer = RecordWriter::new(store.clone(), &config());

        let err = writer
            .write(&parse_line(LINE).unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();

        // first attempt plus three retries
        assert!(matches!(err, WriteError::Store { attempts: 4, .. }));
        assert!(store.snapshot().await.hotels.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rating_leaves_no_review() {
        let store = Arc::new(MemoryStore::new().with_faults(fail_first(
            1,
            |op| matches!(op, StoreOp::UpsertRating { .. }),
            StoreError::malformed("invalid input syntax for type double precision"),
        )));
        let writer = RecordWriter::new(store.clone(), &config());
        let record = parse_line(LINE).unwrap();
        let cancel = CancellationToken::new();

        assert!(writer.write(&record, &cancel).await.is_err());
        let state = store.snapshot().await;
        assert!(state.reviews.is_empty());
        assert!(state.hotels.is_empty());
        assert!(state.providers.is_empty());

        writer.write(&record, &cancel).await.unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.reviews.len(), 1);
        assert_eq!(state.reviews[&1001].id, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay() {
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::Begin => Some(StoreError::transient("connection refused")),
            _ => None,
        }));
        let writer = RecordWriter::new(
            store,
            &ProcessingConfig {
                retry_delay: Duration::from_secs(60),
                ..ProcessingConfig::default()
            },
        );
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = writer
            .write(&parse_line(LINE).unwrap(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, WriteError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_times_out() {
        let store = Arc::new(MemoryStore::new().with_faults(|op| match op {
            StoreOp::Begin => Some(StoreError::timeout("pool timed out")),
            _ => None,
        }));
        let writer = RecordWriter::new(
            store,
            &ProcessingConfig {
                max_retries: 100,
                retry_delay: Duration::from_secs(1),
                record_timeout: Duration::from_secs(5),
                ..ProcessingConfig::default()
            },
        );

        let err = writer
            .write(&parse_line(LINE).unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WriteError::TimedOut(Duration::from_secs(5)));
        assert_eq!(err.category(), Some(ErrorCategory::Timeout));
    }
}
