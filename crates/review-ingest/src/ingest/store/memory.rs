//! In-memory store used by `--dry-run` and the pipeline tests.
//!
//! A transaction keeps only the rows it touched in its own write-set and
//! reads through to the committed state for everything else. The state lock
//! is held per lookup and during commit, never for a transaction's lifetime,
//! so files run concurrently. Ids come from per-table sequences, so a rolled
//! back transaction leaves gaps the way Postgres does.
//!
//! Two transactions may both create the same provider, country or review
//! group. The first commit wins; the second remaps its references to the
//! committed id when it commits.
//!
//! Foreign keys are checked the way the Postgres schema checks them. An
//! optional fault hook lets callers fail any operation with a chosen
//! [`StoreError`].

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{EntityStore, EntityTx, FileLedger};
use crate::db::models::{
    Country, FileOutcome, FileStatus, Hotel, HotelProviderRating, HotelRecord,
    NewHotelProviderRating, NewProcessedFile, NewReview, ProcessedFile, Provider, Resolved,
    Review, ReviewGroup, Upserted,
};
use crate::db::reviews::ReviewRefreshFields;
use crate::db::{StoreError, StoreResult};

/// An operation the store is about to perform, as seen by the fault hook.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Begin,
    UpsertHotel { hotel_id: i64 },
    CreateOrGetProvider { name: String },
    CreateOrGetCountry { name: String },
    CreateOrGetReviewGroup { name: String },
    UpsertReview { hotel_review_id: i64 },
    UpsertRating { hotel_id: i64, provider_id: i32 },
    Commit,
    CreateEntry { path: String },
    UpdateEntry { id: i64 },
}

type FaultHook = Arc<dyn Fn(&StoreOp) -> Option<StoreError> + Send + Sync>;

/// Entity rows, either committed or a transaction's write-set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub hotels: BTreeMap<i64, Hotel>,
    pub providers: BTreeMap<String, Provider>,
    pub countries: BTreeMap<String, Country>,
    pub review_groups: BTreeMap<String, ReviewGroup>,
    pub reviews: BTreeMap<i64, Review>,
    pub ratings: BTreeMap<(i64, i32), HotelProviderRating>,
}

impl MemoryState {
    /// Fold a committed transaction's write-set into this state.
    fn apply(&mut self, pending: MemoryState) {
        let providers = merge_named(&mut self.providers, pending.providers, |p| p.id);
        let countries = merge_named(&mut self.countries, pending.countries, |c| c.id);
        let groups = merge_named(&mut self.review_groups, pending.review_groups, |g| g.id);

        for (hotel_id, mut hotel) in pending.hotels {
            if let Some(existing) = self.hotels.get(&hotel_id) {
                hotel.id = existing.id;
                hotel.created_at = existing.created_at;
            }
            self.hotels.insert(hotel_id, hotel);
        }

        for (hotel_review_id, mut review) in pending.reviews {
            review.provider_id = remapped(&providers, review.provider_id);
            review.reviewer_country_id = review.reviewer_country_id.map(|id| remapped(&countries, id));
            review.reviewer_group_id = review.reviewer_group_id.map(|id| remapped(&groups, id));
            if let Some(existing) = self.reviews.get(&hotel_review_id) {
                review.id = existing.id;
                review.created_at = existing.created_at;
            }
            self.reviews.insert(hotel_review_id, review);
        }

        for (_, mut rating) in pending.ratings {
            rating.provider_id = remapped(&providers, rating.provider_id);
            let key = (rating.hotel_id, rating.provider_id);
            if let Some(existing) = self.ratings.get(&key) {
                rating.id = existing.id;
                rating.created_at = existing.created_at;
            }
            self.ratings.insert(key, rating);
        }
    }
}

/// Insert rows whose name is still free; map the ids of the rest to the
/// rows already committed under that name.
fn merge_named<T>(
    committed: &mut BTreeMap<String, T>,
    pending: BTreeMap<String, T>,
    id: impl Fn(&T) -> i32,
) -> BTreeMap<i32, i32> {
    let mut remap = BTreeMap::new();
    for (name, row) in pending {
        match committed.get(&name) {
            Some(existing) => {
                remap.insert(id(&row), id(existing));
            }
            None => {
                committed.insert(name, row);
            }
        }
    }
    remap
}

fn remapped(remap: &BTreeMap<i32, i32>, id: i32) -> i32 {
    remap.get(&id).copied().unwrap_or(id)
}

#[derive(Debug, Default)]
struct Sequences {
    hotels: AtomicI64,
    providers: AtomicI32,
    countries: AtomicI32,
    review_groups: AtomicI32,
    reviews: AtomicI64,
    ratings: AtomicI64,
}

fn next_i64(sequence: &AtomicI64) -> i64 {
    sequence.fetch_add(1, Ordering::Relaxed) + 1
}

fn next_i32(sequence: &AtomicI32) -> i32 {
    sequence.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Clone, Default)]
struct Hooks {
    faults: Option<FaultHook>,
    operations: Arc<AtomicUsize>,
}

impl Hooks {
    fn check(&self, op: StoreOp) -> StoreResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        match self.faults.as_ref().and_then(|hook| hook(&op)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    ids: Arc<Sequences>,
    ledger: Arc<Mutex<BTreeMap<String, ProcessedFile>>>,
    hooks: Hooks,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("operations", &self.operation_count())
            .field("faults", &self.hooks.faults.is_some())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation for which `hook` returns an error.
    pub fn with_faults(
        mut self,
        hook: impl Fn(&StoreOp) -> Option<StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.faults = Some(Arc::new(hook));
        self
    }

    /// Entity and ledger writes attempted so far, failed ones included.
    pub fn operation_count(&self) -> usize {
        self.hooks.operations.load(Ordering::SeqCst)
    }

    /// Copy of the committed entity rows.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

pub struct MemoryTx {
    committed: Arc<Mutex<MemoryState>>,
    ids: Arc<Sequences>,
    pending: MemoryState,
    hooks: Hooks,
}

impl MemoryTx {
    async fn read_committed<T>(&self, read: impl FnOnce(&MemoryState) -> T) -> T {
        let state = self.committed.lock().await;
        read(&state)
    }

    async fn hotel_exists(&self, hotel_id: i64) -> bool {
        self.pending.hotels.contains_key(&hotel_id)
            || self.read_committed(|s| s.hotels.contains_key(&hotel_id)).await
    }

    async fn provider_exists(&self, id: i32) -> bool {
        self.pending.providers.values().any(|p| p.id == id)
            || self
                .read_committed(|s| s.providers.values().any(|p| p.id == id))
                .await
    }

    async fn country_exists(&self, id: i32) -> bool {
        self.pending.countries.values().any(|c| c.id == id)
            || self
                .read_committed(|s| s.countries.values().any(|c| c.id == id))
                .await
    }

    async fn review_group_exists(&self, id: i32) -> bool {
        self.pending.review_groups.values().any(|g| g.id == id)
            || self
                .read_committed(|s| s.review_groups.values().any(|g| g.id == id))
                .await
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        self.hooks.check(StoreOp::Begin)?;
        Ok(MemoryTx {
            committed: self.state.clone(),
            ids: self.ids.clone(),
            pending: MemoryState::default(),
            hooks: self.hooks.clone(),
        })
    }
}

fn foreign_key_violation(table: &str, constraint: &str) -> StoreError {
    StoreError::constraint(format!(
        "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
        table, constraint
    ))
}

#[async_trait]
impl EntityTx for MemoryTx {
    async fn upsert_hotel(&mut self, hotel: &HotelRecord) -> StoreResult<Upserted> {
        self.hooks.check(StoreOp::UpsertHotel {
            hotel_id: hotel.hotel_id,
        })?;

        let now = Utc::now();
        if let Some(existing) = self.pending.hotels.get_mut(&hotel.hotel_id) {
            existing.name = hotel.name.clone();
            existing.platform = hotel.platform.clone();
            existing.updated_at = now;
            return Ok(Upserted {
                id: existing.id,
                inserted: false,
            });
        }

        let committed = self
            .read_committed(|s| s.hotels.get(&hotel.hotel_id).cloned())
            .await;
        let (row, inserted) = match committed {
            Some(mut row) => {
                row.name = hotel.name.clone();
                row.platform = hotel.platform.clone();
                row.updated_at = now;
                (row, false)
            }
            None => (
                Hotel {
                    id: next_i64(&self.ids.hotels),
                    hotel_id: hotel.hotel_id,
                    name: hotel.name.clone(),
                    platform: hotel.platform.clone(),
                    created_at: now,
                    updated_at: now,
                },
                true,
            ),
        };

        let id = row.id;
        self.pending.hotels.insert(hotel.hotel_id, row);
        Ok(Upserted { id, inserted })
    }

    async fn create_or_get_provider(&mut self, name: &str) -> StoreResult<Resolved<Provider>> {
        self.hooks.check(StoreOp::CreateOrGetProvider {
            name: name.to_string(),
        })?;

        if let Some(existing) = self.pending.providers.get(name) {
            return Ok(Resolved::existing(existing.clone()));
        }
        if let Some(existing) = self.read_committed(|s| s.providers.get(name).cloned()).await {
            return Ok(Resolved::existing(existing));
        }
        let provider = Provider {
            id: next_i32(&self.ids.providers),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.pending
            .providers
            .insert(name.to_string(), provider.clone());
        Ok(Resolved::created(provider))
    }

    async fn create_or_get_country(
        &mut self,
        name: &str,
        flag: &str,
    ) -> StoreResult<Resolved<Country>> {
        self.hooks.check(StoreOp::CreateOrGetCountry {
            name: name.to_string(),
        })?;

        if let Some(existing) = self.pending.countries.get(name) {
            return Ok(Resolved::existing(existing.clone()));
        }
        if let Some(existing) = self.read_committed(|s| s.countries.get(name).cloned()).await {
            return Ok(Resolved::existing(existing));
        }
        let country = Country {
            id: next_i32(&self.ids.countries),
            name: name.to_string(),
            flag: flag.to_string(),
            created_at: Utc::now(),
        };
        self.pending
            .countries
            .insert(name.to_string(), country.clone());
        Ok(Resolved::created(country))
    }

    async fn create_or_get_review_group(
        &mut self,
        name: &str,
    ) -> StoreResult<Resolved<ReviewGroup>> {
        self.hooks.check(StoreOp::CreateOrGetReviewGroup {
            name: name.to_string(),
        })?;

        if let Some(existing) = self.pending.review_groups.get(name) {
            return Ok(Resolved::existing(existing.clone()));
        }
        if let Some(existing) = self
            .read_committed(|s| s.review_groups.get(name).cloned())
            .await
        {
            return Ok(Resolved::existing(existing));
        }
        let group = ReviewGroup {
            id: next_i32(&self.ids.review_groups),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.pending
            .review_groups
            .insert(name.to_string(), group.clone());
        Ok(Resolved::created(group))
    }

    async fn upsert_review(
        &mut self,
        review: &NewReview<'_>,
        refresh: &ReviewRefreshFields,
    ) -> StoreResult<Upserted> {
        self.hooks.check(StoreOp::UpsertReview {
            hotel_review_id: review.hotel_review_id,
        })?;

        if !self.hotel_exists(review.hotel_id).await {
            return Err(foreign_key_violation("reviews", "reviews_hotel_id_fkey"));
        }
        if !self.provider_exists(review.provider_id).await {
            return Err(foreign_key_violation("reviews", "reviews_provider_id_fkey"));
        }
        if let Some(country_id) = review.reviewer_country_id {
            if !self.country_exists(country_id).await {
                return Err(foreign_key_violation("reviews", "reviews_reviewer_country_id_fkey"));
            }
        }
        if let Some(group_id) = review.reviewer_group_id {
            if !self.review_group_exists(group_id).await {
                return Err(foreign_key_violation("reviews", "reviews_reviewer_group_id_fkey"));
            }
        }

        let now = Utc::now();
        let existing = match self.pending.reviews.remove(&review.hotel_review_id) {
            Some(row) => Some(row),
            None => {
                self.read_committed(|s| s.reviews.get(&review.hotel_review_id).cloned())
                    .await
            }
        };

        let (row, inserted) = match existing {
            Some(mut row) => {
                refresh.apply(review.content, &mut row.content);
                row.updated_at = now;
                (row, false)
            }
            None => (
                Review {
                    id: next_i64(&self.ids.reviews),
                    hotel_review_id: review.hotel_review_id,
                    hotel_id: review.hotel_id,
                    provider_id: review.provider_id,
                    reviewer_country_id: review.reviewer_country_id,
                    reviewer_group_id: review.reviewer_group_id,
                    content: review.content.clone(),
                    created_at: now,
                    updated_at: now,
                },
                true,
            ),
        };

        let id = row.id;
        self.pending.reviews.insert(review.hotel_review_id, row);
        Ok(Upserted { id, inserted })
    }

    async fn upsert_rating(
        &mut self,
        rating: &NewHotelProviderRating<'_>,
    ) -> StoreResult<Upserted> {
        self.hooks.check(StoreOp::UpsertRating {
            hotel_id: rating.hotel_id,
            provider_id: rating.provider_id,
        })?;

        if !self.hotel_exists(rating.hotel_id).await {
            return Err(foreign_key_violation(
                "hotel_provider_ratings",
                "hotel_provider_ratings_hotel_id_fkey",
            ));
        }
        if !self.provider_exists(rating.provider_id).await {
            return Err(foreign_key_violation(
                "hotel_provider_ratings",
                "hotel_provider_ratings_provider_id_fkey",
            ));
        }

        let now = Utc::now();
        let key = (rating.hotel_id, rating.provider_id);
        let existing = match self.pending.ratings.remove(&key) {
            Some(row) => Some(row),
            None => self.read_committed(|s| s.ratings.get(&key).cloned()).await,
        };

        let (row, inserted) = match existing {
            Some(mut row) => {
                row.scores = rating.scores.clone();
                row.updated_at = now;
                (row, false)
            }
            None => (
                HotelProviderRating {
                    id: next_i64(&self.ids.ratings),
                    hotel_id: rating.hotel_id,
                    provider_id: rating.provider_id,
                    provider_name: rating.provider_name.to_string(),
                    scores: rating.scores.clone(),
                    created_at: now,
                    updated_at: now,
                },
                true,
            ),
        };

        let id = row.id;
        self.pending.ratings.insert(key, row);
        Ok(Upserted { id, inserted })
    }

    async fn commit(self) -> StoreResult<()> {
        self.hooks.check(StoreOp::Commit)?;
        let MemoryTx {
            committed, pending, ..
        } = self;
        committed.lock().await.apply(pending);
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl FileLedger for MemoryStore {
    async fn is_processed(&self, path: &str) -> StoreResult<bool> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .get(path)
            .map(|entry| entry.status.is_processed())
            .unwrap_or(false))
    }

    async fn create_entry(&self, file: &NewProcessedFile) -> StoreResult<ProcessedFile> {
        self.hooks.check(StoreOp::CreateEntry {
            path: file.s3_path.clone(),
        })?;

        let mut ledger = self.ledger.lock().await;
        let now = Utc::now();
        let next_id = ledger.len() as i64 + 1;
        let entry = ledger
            .entry(file.s3_path.clone())
            .and_modify(|entry| {
                entry.filename = file.filename.clone();
                entry.processed_at = file.processed_at;
                entry.records_count = 0;
                entry.errors_count = 0;
                entry.status = FileStatus::Processing;
                entry.updated_at = now;
            })
            .or_insert_with(|| ProcessedFile {
                id: next_id,
                filename: file.filename.clone(),
                s3_path: file.s3_path.clone(),
                processed_at: file.processed_at,
                records_count: 0,
                errors_count: 0,
                status: FileStatus::Processing,
                created_at: now,
                updated_at: now,
            });
        Ok(entry.clone())
    }

    async fn update_entry(&self, id: i64, outcome: &FileOutcome) -> StoreResult<()> {
        self.hooks.check(StoreOp::UpdateEntry { id })?;

        let mut ledger = self.ledger.lock().await;
        let entry = ledger
            .values_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| StoreError::unknown(format!("processed file {} not found", id)))?;
        entry.records_count = outcome.records_count;
        entry.errors_count = outcome.errors_count;
        entry.status = outcome.status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn find_entry(&self, path: &str) -> StoreResult<Option<ProcessedFile>> {
        Ok(self.ledger.lock().await.get(path).cloned())
    }
}
