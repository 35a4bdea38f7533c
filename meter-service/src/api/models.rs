use meter_client::domain::{Reading, ReadingFilter};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, query::HistoryQuery, transform::parse_timestamp};

#[derive(Debug, Default, Deserialize)]
pub struct DeviceParams {
    pub device_id: Option<String>,
}

impl DeviceParams {
    /// An empty `device_id` means "no filter".
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }
}

/// Raw history query string. Everything arrives as text so that junk in `page` or
/// `limit` falls back to the defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub device_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl HistoryParams {
    pub fn into_query(self) -> Result<HistoryQuery, ApiError> {
        let device_id = DeviceParams {
            device_id: self.device_id,
        }
        .device_id()
        .map(str::to_string);

        Ok(HistoryQuery {
            filter: ReadingFilter {
                device_id,
                from: bound("from", self.from.as_deref())?,
                to: bound("to", self.to.as_deref())?,
            },
            page: self.page.as_deref().and_then(parse_int_lenient),
            limit: self.limit.as_deref().and_then(parse_int_lenient),
        })
    }
}

fn bound(field: &'static str, raw: Option<&str>) -> Result<Option<time::OffsetDateTime>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| ApiError::invalid(field, "must be an ISO-8601 date-time", s)),
    }
}

/// Leading integer of a string: optional sign then digits, anything after is ignored.
/// `"12abc"` is 12, `"2.9"` is 2, `"abc"` is nothing.
pub fn parse_int_lenient(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Saturate absurd values; they are clamped by pagination anyway.
    let value = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub data: Reading,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
