use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use serde_json::Value;

use crate::{
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
    transform::IncomingReading,
};

/// CSV backfill source.
///
/// Columns are matched by header name: device_id, voltage, current, power, energy,
/// frequency, timestamp. Any of them may be missing; empty cells count as absent. Values
/// are passed on as text and checked by the validation stage. A malformed record is
/// yielded as a `Record` error and the following records are still read.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn cell(record: &StringRecord, headers: &StringRecord, name: &str) -> Option<Value> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .and_then(|idx| record.get(idx))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
}

fn record_to_incoming(record: &StringRecord, headers: &StringRecord) -> IncomingReading {
    IncomingReading {
        device_id: cell(record, headers, "device_id"),
        voltage: cell(record, headers, "voltage"),
        current: cell(record, headers, "current"),
        power: cell(record, headers, "power"),
        energy: cell(record, headers, "energy"),
        frequency: cell(record, headers, "frequency"),
        timestamp: cell(record, headers, "timestamp"),
    }
}

#[async_trait::async_trait]
impl Source<IncomingReading> for CsvFileSource {
    async fn stream(&self) -> EnvelopeStream<IncomingReading> {
        // Blocking reader inside the stream; backfill files are read by a single task.
        let path = self.path.clone();
        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open CSV file: {e}")));
                    return;
                }
            };
            let mut rdr = csv::Reader::from_reader(file);
            let headers = match rdr.headers() {
                Ok(h) => h.clone(),
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to read CSV headers: {e}")));
                    return;
                }
            };

            for result in rdr.records() {
                match result {
                    Ok(record) => {
                        yield Ok(Envelope::now(record_to_incoming(&record, &headers)));
                    }
                    Err(e) if e.is_io_error() => {
                        yield Err(PipelineError::Source(format!("failed to read CSV file: {e}")));
                        break;
                    }
                    Err(e) => {
                        metrics::counter!("backfill_parse_errors_total").increment(1);
                        yield Err(PipelineError::Record(format!("bad CSV record: {e}")));
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn malformed_record_does_not_end_the_file() {
        let path = std::env::temp_dir().join(format!("csv-source-{}.csv", std::process::id()));
        tokio::fs::write(
            &path,
            "device_id,energy\nm-1,1.5\nm-2,2.0,extra\nm-3,3.0\n",
        )
        .await
        .unwrap();

        let items: Vec<_> = CsvFileSource::new(&path).stream().await.collect().await;
        tokio::fs::remove_file(&path).await.ok();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().payload.device_id, Some(json!("m-1")));
        assert!(matches!(items[1], Err(PipelineError::Record(_))));
        assert_eq!(items[2].as_ref().unwrap().payload.energy, Some(json!("3.0")));
    }

    #[test]
    fn maps_columns_by_header_name() {
        let headers = StringRecord::from(vec!["timestamp", "device_id", "energy", "voltage"]);
        let record = StringRecord::from(vec!["2024-05-01T10:00:00Z", " m-1 ", "12.5", ""]);

        let incoming = record_to_incoming(&record, &headers);
        assert_eq!(incoming.device_id, Some(json!("m-1")));
        assert_eq!(incoming.energy, Some(json!("12.5")));
        assert_eq!(incoming.timestamp, Some(json!("2024-05-01T10:00:00Z")));
        assert_eq!(incoming.voltage, None);
        assert_eq!(incoming.power, None);
    }
}
