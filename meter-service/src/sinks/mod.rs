pub mod ingest;

pub use ingest::{BackfillStats, IngestSink};
