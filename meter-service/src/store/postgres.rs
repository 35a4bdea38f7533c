use meter_client::{
    db,
    domain::{Reading, ReadingFilter},
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;

use super::{ReadingStore, StoreError};

pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        db::ensure_schema(&self.pool).await?;
        Ok(())
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        db::insert_reading(&self.pool, reading).await?;
        Ok(())
    }

    async fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StoreError> {
        Ok(db::latest_reading(&self.pool, device_id).await?)
    }

    async fn find_page(
        &self,
        filter: &ReadingFilter,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Reading>, StoreError> {
        Ok(db::history_page(&self.pool, filter, to_i64(skip), to_i64(limit)).await?)
    }

    async fn count(&self, filter: &ReadingFilter) -> Result<u64, StoreError> {
        let total = db::count_readings(&self.pool, filter).await?;
        Ok(total.max(0) as u64)
    }

    async fn sum_delta_recorded_between(
        &self,
        device_id: Option<&str>,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<f64, StoreError> {
        Ok(db::sum_delta_recorded_between(&self.pool, device_id, start, end).await?)
    }
}
