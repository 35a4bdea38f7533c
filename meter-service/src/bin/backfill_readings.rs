use anyhow::{bail, Result};
use meter_client::domain::CandidateReading;
use meter_service::{
    config::AppConfig,
    ingest::IngestionService,
    notify::BroadcastNotifier,
    observability,
    pipeline::Pipeline,
    sinks::IngestSink,
    sources::BackfillFileSource,
    store,
    transform::{IncomingReading, ReadingValidation},
};
use std::{env, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_readings <ndjson_or_csv_file_path>");
    }
    let file_path = &args[1];

    // Point METER_CONFIG at a backfill-specific file if needed.
    let cfg = AppConfig::load()?;

    let store = store::connect(&cfg.store).await?;
    let notifier = Arc::new(BroadcastNotifier::new(cfg.realtime.channel_capacity));
    let service = Arc::new(IngestionService::new(store, notifier, (&cfg.ingest).into()));

    let sink = Arc::new(IngestSink::new(service));
    let pipeline: Pipeline<_, IncomingReading, CandidateReading, _> = Pipeline {
        source: BackfillFileSource::for_path(file_path),
        transform: Arc::new(ReadingValidation),
        sink: sink.clone(),
    };

    pipeline.run().await?;

    let stats = sink.stats();
    tracing::info!(
        file = %file_path,
        ingested = stats.ingested,
        skipped = stats.skipped,
        "backfill complete"
    );

    Ok(())
}
