use meter_client::domain::Reading;
use serde::Serialize;
use tokio::sync::broadcast;

pub const NEW_MEASUREMENT_EVENT: &str = "new-measurement";

/// Event pushed to realtime subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: &'static str,
    pub data: Reading,
}

impl RealtimeEvent {
    pub fn new_measurement(reading: Reading) -> Self {
        Self {
            event: NEW_MEASUREMENT_EVENT,
            data: reading,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("realtime channel closed")]
    Closed,
}

/// Fan-out of freshly ingested readings. Implementations must not block.
pub trait ReadingNotifier: Send + Sync {
    /// Returns the number of subscribers the event was handed to.
    fn notify(&self, reading: &Reading) -> Result<usize, NotifyError>;
}

/// Notifier backed by a tokio broadcast channel; each WebSocket connection holds a receiver.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ReadingNotifier for BroadcastNotifier {
    fn notify(&self, reading: &Reading) -> Result<usize, NotifyError> {
        // A send error only means nobody is connected right now.
        Ok(self
            .tx
            .send(RealtimeEvent::new_measurement(reading.clone()))
            .unwrap_or(0))
    }
}
