use std::{sync::Arc, time::SystemTime};

use futures::StreamExt;
use meter_client::domain::CandidateReading;

use crate::{
    ingest::IngestionService,
    pipeline::{Envelope, PipelineError, Sink},
};

/// Counters reported once a backfill run finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillStats {
    pub ingested: u64,
    pub skipped: u64,
}

/// Feeds validated candidates through the ingestion service one at a time, so each
/// sample sees the baseline left by the one before it.
///
/// Rejected upstream records are logged and skipped. A source or store failure aborts
/// the run: continuing would compute later deltas against a missing baseline.
pub struct IngestSink {
    service: Arc<IngestionService>,
    stats: std::sync::Mutex<BackfillStats>,
}

impl IngestSink {
    pub fn new(service: Arc<IngestionService>) -> Self {
        Self {
            service,
            stats: std::sync::Mutex::new(BackfillStats::default()),
        }
    }

    pub fn stats(&self) -> BackfillStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, f: impl FnOnce(&mut BackfillStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|p| p.into_inner()));
    }
}

#[async_trait::async_trait]
impl Sink<CandidateReading> for IngestSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<CandidateReading>, PipelineError>> + Send + Unpin + 'static,
    {
        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) if e.is_record_level() => {
                    tracing::warn!(error = %e, "skipping backfill record");
                    self.record(|s| s.skipped += 1);
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "backfill aborted");
                    return Err(e);
                }
            };

            let received_at = env.received_at;
            self.service
                .ingest(env.payload)
                .await
                .map_err(|e| PipelineError::Sink(e.to_string()))?;
            self.record(|s| s.ingested += 1);

            if let Ok(dur) = SystemTime::now().duration_since(received_at) {
                metrics::histogram!("backfill_record_latency_seconds").record(dur.as_secs_f64());
            }
        }

        let stats = self.stats();
        tracing::info!(ingested = stats.ingested, skipped = stats.skipped, "backfill finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ingest::IngestOptions,
        notify::BroadcastNotifier,
        pipeline::Pipeline,
        sources::NdjsonFileSource,
        store::{MemoryReadingStore, ReadingStore},
        transform::{IncomingReading, ReadingValidation},
    };
    use meter_client::domain::ReadingFilter;

    #[tokio::test]
    async fn backfill_replays_file_in_order_and_skips_invalid_records() {
        let path = std::env::temp_dir().join(format!("ingest-sink-{}.ndjson", std::process::id()));
        let lines = [
            r#"{"device_id":"m-1","energy":10,"timestamp":"2024-05-01T10:00:00Z"}"#,
            r#"{"device_id":"m-1","energy":13,"timestamp":"2024-05-01T10:01:00Z"}"#,
            r#"{"device_id":"m-1","voltage":-5,"energy":14}"#,
            r#"{"device_id":"m-1","energy":"17.5","timestamp":"2024-05-01T10:02:00Z"}"#,
        ];
        tokio::fs::write(&path, lines.join("\n")).await.unwrap();

        let store = Arc::new(MemoryReadingStore::new());
        let service = Arc::new(IngestionService::new(
            store.clone(),
            Arc::new(BroadcastNotifier::new(4)),
            IngestOptions::default(),
        ));
        let sink = Arc::new(IngestSink::new(service));

        let pipeline: Pipeline<_, IncomingReading, CandidateReading, _> = Pipeline {
            source: NdjsonFileSource::new(&path),
            transform: Arc::new(ReadingValidation),
            sink: sink.clone(),
        };
        pipeline.run().await.unwrap();
        tokio::fs::remove_file(&path).await.ok();

        assert_eq!(sink.stats(), BackfillStats { ingested: 3, skipped: 1 });

        let page = store.find_page(&ReadingFilter::device("m-1"), 0, 10).await.unwrap();
        let deltas: Vec<f64> = page.iter().map(|r| r.delta_energy).collect();
        assert_eq!(deltas, vec![4.5, 3.0, 10.0]);
    }

    async fn run_backfill(name: &str, contents: &str) -> (Result<(), PipelineError>, BackfillStats, Arc<MemoryReadingStore>) {
        let path = std::env::temp_dir().join(format!("{name}-{}.ndjson", std::process::id()));
        tokio::fs::write(&path, contents).await.unwrap();

        let store = Arc::new(MemoryReadingStore::new());
        let service = Arc::new(IngestionService::new(
            store.clone(),
            Arc::new(BroadcastNotifier::new(4)),
            IngestOptions::default(),
        ));
        let sink = Arc::new(IngestSink::new(service));
        let pipeline: Pipeline<_, IncomingReading, CandidateReading, _> = Pipeline {
            source: NdjsonFileSource::new(&path),
            transform: Arc::new(ReadingValidation),
            sink: sink.clone(),
        };
        let res = pipeline.run().await;
        tokio::fs::remove_file(&path).await.ok();

        (res, sink.stats(), store)
    }

    #[tokio::test]
    async fn unparseable_line_mid_file_is_skipped() {
        let lines = [
            r#"{"device_id":"m-1","energy":10,"timestamp":"2024-05-01T10:00:00Z"}"#,
            r#"{not json"#,
            r#"{"device_id":"m-1","energy":12,"timestamp":"2024-05-01T10:01:00Z"}"#,
            r#"{"device_id":"m-1","energy":15,"timestamp":"2024-05-01T10:02:00Z"}"#,
        ];
        let (res, stats, store) = run_backfill("ingest-sink-bad-json", &lines.join("\n")).await;

        res.unwrap();
        assert_eq!(stats, BackfillStats { ingested: 3, skipped: 1 });
        assert_eq!(store.len().await, 3);

        let page = store.find_page(&ReadingFilter::device("m-1"), 0, 10).await.unwrap();
        let deltas: Vec<f64> = page.iter().map(|r| r.delta_energy).collect();
        assert_eq!(deltas, vec![3.0, 2.0, 10.0]);
    }

    #[tokio::test]
    async fn unreadable_file_fails_the_run() {
        let store = Arc::new(MemoryReadingStore::new());
        let service = Arc::new(IngestionService::new(
            store.clone(),
            Arc::new(BroadcastNotifier::new(4)),
            IngestOptions::default(),
        ));
        let sink = Arc::new(IngestSink::new(service));
        let pipeline: Pipeline<_, IncomingReading, CandidateReading, _> = Pipeline {
            source: NdjsonFileSource::new("/definitely/not/here.ndjson"),
            transform: Arc::new(ReadingValidation),
            sink: sink.clone(),
        };

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
        assert_eq!(sink.stats(), BackfillStats::default());
        assert!(store.is_empty().await);
    }
}
