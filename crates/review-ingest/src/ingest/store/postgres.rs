//! Postgres-backed store over a shared `PgPool`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{EntityStore, EntityTx, FileLedger};
use crate::db::models::{
    Country, FileOutcome, HotelRecord, NewHotelProviderRating, NewProcessedFile, NewReview,
    ProcessedFile, Provider, Resolved, ReviewGroup, Upserted,
};
use crate::db::reviews::ReviewRefreshFields;
use crate::db::{
    countries, hotel_provider_ratings, hotels, processed_files, providers, review_groups, reviews,
    StoreResult,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgEntityTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EntityStore for PgStore {
    type Tx = PgEntityTx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PgEntityTx { tx })
    }
}

#[async_trait]
impl EntityTx for PgEntityTx {
    async fn upsert_hotel(&mut self, hotel: &HotelRecord) -> StoreResult<Upserted> {
        hotels::upsert(&mut self.tx, hotel).await
    }

    async fn create_or_get_provider(&mut self, name: &str) -> StoreResult<Resolved<Provider>> {
        providers::create_or_get(&mut self.tx, name).await
    }

    async fn create_or_get_country(
        &mut self,
        name: &str,
        flag: &str,
    ) -> StoreResult<Resolved<Country>> {
        countries::create_or_get(&mut self.tx, name, flag).await
    }

    async fn create_or_get_review_group(
        &mut self,
        name: &str,
    ) -> StoreResult<Resolved<ReviewGroup>> {
        review_groups::create_or_get(&mut self.tx, name).await
    }

    async fn upsert_review(
        &mut self,
        review: &NewReview<'_>,
        refresh: &ReviewRefreshFields,
    ) -> StoreResult<Upserted> {
        reviews::upsert(&mut self.tx, review, refresh).await
    }

    async fn upsert_rating(
        &mut self,
        rating: &NewHotelProviderRating<'_>,
    ) -> StoreResult<Upserted> {
        hotel_provider_ratings::upsert(&mut self.tx, rating).await
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl FileLedger for PgStore {
    async fn is_processed(&self, path: &str) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        processed_files::is_processed(&mut conn, path).await
    }

    async fn create_entry(&self, file: &NewProcessedFile) -> StoreResult<ProcessedFile> {
        let mut conn = self.pool.acquire().await?;
        processed_files::create(&mut conn, file).await
    }

    async fn update_entry(&self, id: i64, outcome: &FileOutcome) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        processed_files::update(&mut conn, id, outcome).await
    }

    async fn find_entry(&self, path: &str) -> StoreResult<Option<ProcessedFile>> {
        let mut conn = self.pool.acquire().await?;
        processed_files::get_by_path(&mut conn, path).await
    }
}
