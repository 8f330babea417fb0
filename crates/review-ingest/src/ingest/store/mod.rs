//! Persistence seams used by the pipeline.
//!
//! The writer only needs a transaction that can resolve and write entities;
//! the processor only needs the file ledger. Both are implemented by
//! [`PgStore`] for production and [`MemoryStore`] for tests and dry runs.

use async_trait::async_trait;

use crate::db::models::{
    Country, FileOutcome, HotelRecord, NewHotelProviderRating, NewProcessedFile, NewReview,
    ProcessedFile, Provider, Resolved, ReviewGroup, Upserted,
};
use crate::db::reviews::ReviewRefreshFields;
use crate::db::StoreResult;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryState, MemoryStore, StoreOp};
pub use postgres::PgStore;

/// Opens the per-record transactions.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    type Tx: EntityTx;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait EntityTx: Send {
    async fn upsert_hotel(&mut self, hotel: &HotelRecord) -> StoreResult<Upserted>;

    async fn create_or_get_provider(&mut self, name: &str) -> StoreResult<Resolved<Provider>>;

    async fn create_or_get_country(&mut self, name: &str, flag: &str)
        -> StoreResult<Resolved<Country>>;

    async fn create_or_get_review_group(&mut self, name: &str)
        -> StoreResult<Resolved<ReviewGroup>>;

    async fn upsert_review(
        &mut self,
        review: &NewReview<'_>,
        refresh: &ReviewRefreshFields,
    ) -> StoreResult<Upserted>;

    async fn upsert_rating(&mut self, rating: &NewHotelProviderRating<'_>)
        -> StoreResult<Upserted>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

/// The processed-files ledger.
#[async_trait]
pub trait FileLedger: Send + Sync + 'static {
    async fn is_processed(&self, path: &str) -> StoreResult<bool>;

    /// Create the row in `Processing`, resetting any earlier non-terminal row.
    async fn create_entry(&self, file: &NewProcessedFile) -> StoreResult<ProcessedFile>;

    async fn update_entry(&self, id: i64, outcome: &FileOutcome) -> StoreResult<()>;

    async fn find_entry(&self, path: &str) -> StoreResult<Option<ProcessedFile>>;
}
