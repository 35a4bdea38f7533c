use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::notify::RealtimeEvent;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// GET /ws. Every connected client receives each newly ingested reading as
/// `{"event":"new-measurement","data":{...}}`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    // Subscribe before the upgrade completes so nothing published in between is lost.
    let rx = state.realtime.subscribe();
    ws.on_upgrade(move |socket| handle_connection(socket, rx, client_id))
}

async fn handle_connection(
    socket: WebSocket,
    rx: broadcast::Receiver<RealtimeEvent>,
    client_id: u64,
) {
    info!(client_id, "realtime client connected");
    metrics::gauge!("realtime_clients").increment(1.0);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let events = BroadcastStream::new(rx);

    let mut send_task = tokio::spawn(async move {
        let sent = forward_events(events, &mut ws_sender, client_id).await;
        debug!(client_id, sent, "realtime send loop finished");
    });

    // Clients only listen; inbound frames are drained until close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(client_id, error = %e, "realtime receive failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    metrics::gauge!("realtime_clients").decrement(1.0);
    info!(client_id, "realtime client disconnected");
}

/// Writes each event as a JSON text frame until the channel closes or the client goes
/// away. Events missed by a lagging client are skipped. Returns the number of frames sent.
async fn forward_events<E, S>(mut events: E, sender: &mut S, client_id: u64) -> usize
where
    E: Stream<Item = Result<RealtimeEvent, BroadcastStreamRecvError>> + Unpin,
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut sent = 0;
    while let Some(item) = events.next().await {
        let event = match item {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                metrics::counter!("realtime_events_dropped_total").increment(skipped);
                warn!(client_id, skipped, "realtime client lagging, events dropped");
                continue;
            }
        };

        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(e) => {
                error!(error = %e, "failed to serialize realtime event");
                continue;
            }
        };

        if let Err(e) = sender.send(Message::Text(json)).await {
            debug!(client_id, error = %e, "realtime send failed");
            break;
        }
        sent += 1;
    }
    sent
}
