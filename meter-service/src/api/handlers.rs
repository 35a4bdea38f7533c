use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use meter_client::domain::Reading;

use super::{
    models::{DataResponse, DeviceParams, HealthResponse, HistoryParams, IngestResponse},
    AppState,
};
use crate::{
    error::{ApiError, Result},
    query::{HistoryPage, UsageSummary},
    transform::{validate_incoming, FieldError, IncomingReading},
};

pub async fn root() -> &'static str {
    "hello world"
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// POST /api/data
pub async fn ingest(
    State(state): State<AppState>,
    payload: std::result::Result<Json<IncomingReading>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let Json(incoming) = payload.map_err(|rejection| {
        metrics::counter!("ingest_validation_rejected_total").increment(1);
        ApiError::Validation(vec![FieldError {
            field: "body",
            message: rejection.body_text(),
            value: None,
        }])
    })?;

    let candidate = validate_incoming(&incoming).map_err(|errors| {
        metrics::counter!("ingest_validation_rejected_total").increment(1);
        tracing::debug!(errors = errors.len(), "reading rejected");
        ApiError::Validation(errors)
    })?;

    let reading = state.ingestion.ingest(candidate).await?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            success: true,
            data: reading,
        }),
    ))
}

pub async fn latest(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<DataResponse<Option<Reading>>>> {
    let data = state.queries.latest(params.device_id()).await?;
    Ok(Json(DataResponse { data }))
}

pub async fn last_one(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<DataResponse<Option<Reading>>>> {
    let data = state.queries.last_one(params.device_id()).await?;
    Ok(Json(DataResponse { data }))
}

pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>> {
    let query = params.into_query()?;
    let page = state.queries.history(query).await?;
    Ok(Json(page))
}

pub async fn usage(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<UsageSummary>> {
    let summary = state.queries.usage(params.device_id()).await?;
    Ok(Json(summary))
}
