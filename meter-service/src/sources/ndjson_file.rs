use std::path::PathBuf;

use async_stream::stream;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::{
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
    transform::IncomingReading,
};

/// Backfill source reading one JSON object per line, in the same shape as the ingest
/// request body. Blank lines are skipped. A line that is not valid JSON is yielded as a
/// `Record` error and reading continues; open or read failures end the stream.
pub struct NdjsonFileSource {
    path: PathBuf,
}

impl NdjsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source<IncomingReading> for NdjsonFileSource {
    async fn stream(&self) -> EnvelopeStream<IncomingReading> {
        let path = self.path.clone();
        let s = stream! {
            let file = match File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open backfill file: {e}")));
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();
            let mut line_no: u64 = 0;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(PipelineError::Source(format!("failed to read backfill line: {e}")));
                        break;
                    }
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<IncomingReading>(&line) {
                    Ok(parsed) => {
                        yield Ok(Envelope::now(parsed));
                    }
                    Err(e) => {
                        metrics::counter!("backfill_parse_errors_total").increment(1);
                        yield Err(PipelineError::Record(format!("line {line_no}: invalid json: {e}")));
                    }
                }
            }
        };

        Box::pin(s)
    }
}
