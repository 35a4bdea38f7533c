use std::sync::Arc;

use meter_client::domain::{Reading, ReadingFilter};
use time::OffsetDateTime;

use crate::config::{StoreConfig, StoreKind};

pub mod memory;
pub mod postgres;

pub use memory::MemoryReadingStore;
pub use postgres::PgReadingStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(#[from] anyhow::Error),
}

/// Append-only time series of meter readings.
///
/// Ordering for `latest` and `find_page` is by `timestamp`, newest first. Window sums
/// select on `recorded_at`.
#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, reading: &Reading) -> Result<(), StoreError>;

    async fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StoreError>;

    async fn find_page(
        &self,
        filter: &ReadingFilter,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Reading>, StoreError>;

    async fn count(&self, filter: &ReadingFilter) -> Result<u64, StoreError>;

    /// Sum of `delta_energy` over readings with `recorded_at` in `[start, end]`.
    async fn sum_delta_recorded_between(
        &self,
        device_id: Option<&str>,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<f64, StoreError>;
}

/// Build the store selected in configuration.
pub async fn connect(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn ReadingStore>> {
    match cfg.kind {
        StoreKind::Memory => {
            tracing::warn!("using in-memory reading store; data is lost on restart");
            Ok(Arc::new(MemoryReadingStore::new()))
        }
        StoreKind::Postgres => {
            let store = PgReadingStore::connect(&cfg.uri, cfg.max_connections).await?;
            store.ensure_schema().await?;
            tracing::info!(max_connections = cfg.max_connections, "connected to reading store");
            Ok(Arc::new(store))
        }
    }
}
