use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use meter_client::domain::{
    CandidateReading, DeltaCalculator, EqualCounterPolicy, PreviousState, Reading,
};
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;

use crate::{
    notify::ReadingNotifier,
    store::{ReadingStore, StoreError},
};

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("failed to load previous reading for device {device_id}: {source}")]
    PreviousLookup {
        device_id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to persist reading for device {device_id}: {source}")]
    Persist {
        device_id: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    pub equal_counter_policy: EqualCounterPolicy,
    pub serialize_per_device: bool,
}

impl From<&crate::config::IngestConfig> for IngestOptions {
    fn from(cfg: &crate::config::IngestConfig) -> Self {
        Self {
            equal_counter_policy: cfg.equal_counter_policy,
            serialize_per_device: cfg.serialize_per_device,
        }
    }
}

/// One async mutex per device id. An entry is dropped again once no task holds or
/// waits on it.
#[derive(Default)]
struct DeviceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceLocks {
    async fn lock(&self, device_id: &str) -> DeviceGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(device_id.to_string()).or_default().clone()
        };
        DeviceGuard {
            locks: self,
            device_id: device_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn prune(&self, device_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Waiters hold a clone of the Arc, so a count of 1 means the map is the only owner.
        if locks.get(device_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(device_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

struct DeviceGuard<'a> {
    locks: &'a DeviceLocks,
    device_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex first so its Arc clone is gone before pruning.
        self.guard.take();
        self.locks.prune(&self.device_id);
    }
}

/// Turns validated candidates into persisted readings.
///
/// Without `serialize_per_device`, two concurrent samples for the same device can both
/// read the same baseline before either is written; both deltas are then computed
/// against it.
pub struct IngestionService {
    store: Arc<dyn ReadingStore>,
    notifier: Arc<dyn ReadingNotifier>,
    calculator: DeltaCalculator,
    device_locks: Option<DeviceLocks>,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        notifier: Arc<dyn ReadingNotifier>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            notifier,
            calculator: DeltaCalculator::new(options.equal_counter_policy),
            device_locks: options.serialize_per_device.then(DeviceLocks::default),
        }
    }

    pub async fn ingest(&self, candidate: CandidateReading) -> Result<Reading, IngestError> {
        let started = Instant::now();
        let result = self.ingest_inner(candidate).await;

        match &result {
            Ok(reading) => {
                metrics::counter!("readings_ingested_total").increment(1);
                metrics::histogram!("ingest_latency_seconds").record(started.elapsed().as_secs_f64());
                tracing::debug!(
                    device_id = %reading.device_id,
                    delta_energy = reading.delta_energy,
                    raw_counter = reading.raw_counter,
                    "reading ingested"
                );
                self.publish(reading);
            }
            Err(e) => {
                metrics::counter!("ingest_failed_total").increment(1);
                tracing::error!(error = %e, "ingestion failed");
            }
        }

        result
    }

    async fn ingest_inner(&self, candidate: CandidateReading) -> Result<Reading, IngestError> {
        let _guard = match &self.device_locks {
            Some(locks) => Some(locks.lock(&candidate.device_id).await),
            None => None,
        };

        let previous = self
            .store
            .latest(Some(&candidate.device_id))
            .await
            .map_err(|source| IngestError::PreviousLookup {
                device_id: candidate.device_id.clone(),
                source,
            })?;

        let outcome = self
            .calculator
            .compute(previous.as_ref().map(PreviousState::from), candidate.raw_counter);
        if outcome.anomaly {
            metrics::counter!("delta_non_finite_total").increment(1);
            tracing::debug!(device_id = %candidate.device_id, "non-finite delta forced to 0");
        }

        let recorded_at = OffsetDateTime::now_utc();
        let timestamp = candidate.timestamp.unwrap_or(recorded_at);
        let reading = Reading::from_candidate(candidate, outcome, timestamp, recorded_at);

        self.store
            .insert(&reading)
            .await
            .map_err(|source| IngestError::Persist {
                device_id: reading.device_id.clone(),
                source,
            })?;

        Ok(reading)
    }

    fn publish(&self, reading: &Reading) {
        match self.notifier.notify(reading) {
            Ok(subscribers) => {
                tracing::trace!(subscribers, "new-measurement published");
            }
            Err(e) => {
                metrics::counter!("notify_failed_total").increment(1);
                tracing::warn!(error = %e, device_id = %reading.device_id, "realtime notify failed");
            }
        }
    }
}
