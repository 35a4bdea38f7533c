use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

/// `Record` and `Transform` reject a single item and the stream carries on; `Source`
/// and `Sink` end the run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("unreadable record: {0}")]
    Record(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

impl PipelineError {
    /// True for errors that only affect one item.
    pub fn is_record_level(&self) -> bool {
        matches!(self, PipelineError::Record(_) | PipelineError::Transform(_))
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

#[async_trait::async_trait]
impl<T, K> Sink<T> for Arc<K>
where
    T: Send + 'static,
    K: Sink<T>,
{
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static,
    {
        (**self).run(input).await
    }
}

/// Source → single validation stage → sink. Items are processed strictly in order,
/// which backfills rely on for delta baselines.
pub struct Pipeline<S, I, O, K> {
    pub source: S,
    pub transform: Arc<dyn Transform<I, O> + Send + Sync>,
    pub sink: K,
}

impl<S, I, O, K> Pipeline<S, I, O, K>
where
    I: Send + 'static,
    O: Send + 'static,
    S: Source<I> + Send + Sync + 'static,
    K: Sink<O> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let stream = self.source.stream().await;

        let transform = self.transform;
        let stream: EnvelopeStream<O> = Box::pin(stream.then(move |item| {
            let transform = transform.clone();
            async move {
                match item {
                    Ok(env) => transform.apply(env).await,
                    Err(e) => Err(e),
                }
            }
        }));

        self.sink.run(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct VecSource(Vec<i64>);

    #[async_trait::async_trait]
    impl Source<i64> for VecSource {
        async fn stream(&self) -> EnvelopeStream<i64> {
            let items: Vec<_> = self.0.iter().copied().map(|v| Ok(Envelope::now(v))).collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct RejectNegative;

    #[async_trait::async_trait]
    impl Transform<i64, u64> for RejectNegative {
        async fn apply(&self, input: Envelope<i64>) -> Result<Envelope<u64>, PipelineError> {
            u64::try_from(input.payload)
                .map(|v| Envelope {
                    payload: v,
                    received_at: input.received_at,
                })
                .map_err(|e| PipelineError::Transform(e.to_string()))
        }
    }

    #[derive(Default)]
    struct CollectSink {
        ok: Mutex<Vec<u64>>,
        errors: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl Sink<u64> for CollectSink {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<u64>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                match item {
                    Ok(env) => self.ok.lock().unwrap().push(env.payload),
                    Err(_) => *self.errors.lock().unwrap() += 1,
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transform_errors_flow_to_sink_in_order() {
        let sink = Arc::new(CollectSink::default());
        let pipeline: Pipeline<_, i64, u64, _> = Pipeline {
            source: VecSource(vec![3, -1, 1, 2]),
            transform: Arc::new(RejectNegative),
            sink: sink.clone(),
        };

        pipeline.run().await.unwrap();

        assert_eq!(*sink.ok.lock().unwrap(), vec![3, 1, 2]);
        assert_eq!(*sink.errors.lock().unwrap(), 1);
    }
}
