use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{ingest::IngestError, store::StoreError, transform::FieldError};

/// Errors surfaced by HTTP handlers. Only validation failures carry detail back to the
/// caller; everything else is logged and answered with an opaque server error.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<FieldError>),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn invalid(field: &'static str, message: impl Into<String>, value: &str) -> Self {
        ApiError::Validation(vec![FieldError {
            field,
            message: message.into(),
            value: Some(serde_json::Value::String(value.to_string())),
        }])
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response()
            }
            ApiError::Ingest(ref e) => {
                tracing::error!(error = ?e, "ingest request failed");
                server_error()
            }
            ApiError::Store(ref e) => {
                tracing::error!(error = ?e, "query request failed");
                server_error()
            }
        }
    }
}

fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Server error" })),
    )
        .into_response()
}

pub type Result<T> = std::result::Result<T, ApiError>;
