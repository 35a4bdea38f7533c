pub mod handlers;
pub mod models;
pub mod ws;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::{
    ingest::{IngestOptions, IngestionService},
    notify::BroadcastNotifier,
    query::QueryEngine,
    store::ReadingStore,
};

/// JSON bodies larger than this are rejected before validation.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub queries: Arc<QueryEngine>,
    pub realtime: BroadcastNotifier,
}

impl AppState {
    pub fn new(store: Arc<dyn ReadingStore>, options: IngestOptions, channel_capacity: usize) -> Self {
        let realtime = BroadcastNotifier::new(channel_capacity);
        let ingestion = IngestionService::new(store.clone(), Arc::new(realtime.clone()), options);

        Self {
            ingestion: Arc::new(ingestion),
            queries: Arc::new(QueryEngine::new(store)),
            realtime,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/api/health", get(handlers::health));

    let data_routes = Router::new()
        .route("/api/data", post(handlers::ingest))
        .route("/api/data/latest", get(handlers::latest))
        .route("/api/data/last-one", get(handlers::last_one))
        .route("/api/data/history", get(handlers::history))
        .route("/api/data/usage", get(handlers::usage));

    let realtime_routes = Router::new().route("/ws", get(ws::ws_handler));

    Router::new()
        .merge(public_routes)
        .merge(data_routes)
        .merge(realtime_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::span!(
                        Level::INFO,
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(|_request: &Request, _span: &tracing::Span| {
                    tracing::event!(Level::DEBUG, "received request");
                })
                .on_response(
                    |response: &axum::response::Response,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::event!(
                            Level::INFO,
                            status = response.status().as_u16(),
                            latency = ?latency,
                            "request completed"
                        );
                    },
                )
                .on_failure(
                    |_error: tower_http::classify::ServerErrorsFailureClass,
                     _latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::event!(Level::ERROR, "request failed");
                    },
                ),
        )
}
