pub mod csv_file;
pub mod ndjson_file;

use std::path::Path;

pub use csv_file::CsvFileSource;
pub use ndjson_file::NdjsonFileSource;

use crate::{
    pipeline::{EnvelopeStream, Source},
    transform::IncomingReading,
};

/// Backfill file source picked by extension: `.csv` is CSV, anything else NDJSON.
pub enum BackfillFileSource {
    Csv(CsvFileSource),
    Ndjson(NdjsonFileSource),
}

impl BackfillFileSource {
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            Self::Csv(CsvFileSource::new(path))
        } else {
            Self::Ndjson(NdjsonFileSource::new(path))
        }
    }
}

#[async_trait::async_trait]
impl Source<IncomingReading> for BackfillFileSource {
    async fn stream(&self) -> EnvelopeStream<IncomingReading> {
        match self {
            Self::Csv(s) => s.stream().await,
            Self::Ndjson(s) => s.stream().await,
        }
    }
}
