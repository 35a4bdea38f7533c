use meter_client::domain::{Reading, ReadingFilter};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{ReadingStore, StoreError};

/// Reading store kept in process memory, in insertion order.
///
/// Ties on `timestamp` resolve to the most recently inserted reading.
#[derive(Default)]
pub struct MemoryReadingStore {
    readings: RwLock<Vec<Reading>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.readings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.readings.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        self.readings.write().await.push(reading.clone());
        Ok(())
    }

    async fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StoreError> {
        let readings = self.readings.read().await;
        let latest = readings
            .iter()
            .filter(|r| device_id.map_or(true, |d| r.device_id == d))
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .cloned();
        Ok(latest)
    }

    async fn find_page(
        &self,
        filter: &ReadingFilter,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Reading>, StoreError> {
        let readings = self.readings.read().await;
        let mut matching: Vec<&Reading> = readings.iter().rev().filter(|r| filter.matches(r)).collect();
        // Stable sort keeps newer inserts first among equal timestamps.
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(skip).take(limit).cloned().collect())
    }

    async fn count(&self, filter: &ReadingFilter) -> Result<u64, StoreError> {
        let readings = self.readings.read().await;
        Ok(readings.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn sum_delta_recorded_between(
        &self,
        device_id: Option<&str>,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<f64, StoreError> {
        let readings = self.readings.read().await;
        Ok(readings
            .iter()
            .filter(|r| device_id.map_or(true, |d| r.device_id == d))
            .filter(|r| r.recorded_at >= start && r.recorded_at <= end)
            .map(|r| r.delta_energy)
            .sum())
    }
}
