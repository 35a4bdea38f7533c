use std::sync::Arc;

use meter_client::domain::{Reading, ReadingFilter};
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::store::{ReadingStore, StoreError};

pub const DEFAULT_PAGE_LIMIT: u64 = 100;
pub const MAX_PAGE_LIMIT: u64 = 1000;

const DAY_WINDOW: Duration = Duration::hours(24);
const MONTH_WINDOW: Duration = Duration::days(30);

/// Effective page and page size after clamping what the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    /// Missing, zero or negative page → 1. Missing or zero limit → 100; anything else
    /// is clamped into `1..=1000`.
    pub fn clamp(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p >= 1 => p as u64,
            _ => 1,
        };
        let limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(l) if l < 0 => 1,
            Some(l) => (l as u64).min(MAX_PAGE_LIMIT),
        };
        Self { page, limit }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::clamp(None, None)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub filter: ReadingFilter,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    #[serde(rename = "data")]
    pub records: Vec<Reading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageSummary {
    #[serde(rename = "last24hUsage")]
    pub last_24h_usage: f64,
    #[serde(rename = "last30dUsage")]
    pub last_30d_usage: f64,
}

/// Read side over the reading store: history pages, latest lookups and usage windows.
pub struct QueryEngine {
    store: Arc<dyn ReadingStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// The total is counted separately from the page fetch, so an insert landing in
    /// between can make them disagree.
    pub async fn history(&self, query: HistoryQuery) -> Result<HistoryPage, StoreError> {
        let pagination = Pagination::clamp(query.page, query.limit);

        let total = self.store.count(&query.filter).await?;
        let records = self
            .store
            .find_page(&query.filter, pagination.skip(), pagination.limit)
            .await?;

        Ok(HistoryPage {
            page: pagination.page,
            limit: pagination.limit,
            total,
            records,
        })
    }

    pub async fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StoreError> {
        self.store.latest(device_id).await
    }

    /// Same lookup as [`QueryEngine::latest`]; both routes are served for older clients.
    pub async fn last_one(&self, device_id: Option<&str>) -> Result<Option<Reading>, StoreError> {
        self.latest(device_id).await
    }

    pub async fn usage(&self, device_id: Option<&str>) -> Result<UsageSummary, StoreError> {
        self.usage_at(device_id, OffsetDateTime::now_utc()).await
    }

    pub async fn usage_at(
        &self,
        device_id: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<UsageSummary, StoreError> {
        let last_24h_usage = self.window_sum(device_id, now - DAY_WINDOW, now).await?;
        let last_30d_usage = self.window_sum(device_id, now - MONTH_WINDOW, now).await?;

        Ok(UsageSummary {
            last_24h_usage,
            last_30d_usage,
        })
    }

    async fn window_sum(
        &self,
        device_id: Option<&str>,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<f64, StoreError> {
        let total = self.store.sum_delta_recorded_between(device_id, start, end).await?;
        Ok(if total.is_finite() { total } else { 0.0 })
    }
}
