pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics_server;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use api::{create_router, AppState};
pub use ingest::{IngestOptions, IngestionService};
pub use pipeline::{Envelope, Pipeline};
