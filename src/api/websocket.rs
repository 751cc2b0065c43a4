//! WebSocket support for live node activity.
//!
//! Clients connect to `/ws` and receive every [`NodeEvent`] as a JSON text
//! frame as it happens: queued transactions, mined and received blocks,
//! chain replacements and peer registrations.

use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{info, debug, warn};

use super::events::NodeEvent;
use super::AppState;

/// Fan-out of node events to connected WebSocket clients
#[derive(Clone)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<NodeEvent>,
}

impl WsBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast(&self, event: NodeEvent) {
        // No receivers connected is fine
        let _ = self.sender.send(event);
    }

    /// Get a new receiver
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(node): State<AppState>,
) -> impl IntoResponse {
    let broadcaster = node.ws.clone();
    info!("🔌 WebSocket client connecting (total: {})", broadcaster.subscriber_count() + 1);

    // Subscribe before the upgrade completes so no event is missed in between.
    let rx = broadcaster.subscribe();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, rx, broadcaster))
}

/// Handle an individual WebSocket connection
async fn handle_ws_connection(
    socket: WebSocket,
    mut rx: broadcast::Receiver<NodeEvent>,
    broadcaster: WsBroadcaster,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("WS client lagged, {} events skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Client disconnected
                    }
                }
                Err(e) => {
                    warn!("Failed to serialize WS event: {}", e);
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => debug!("WS ping received"),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("🔌 WebSocket client disconnected (remaining: {})", broadcaster.subscriber_count());
}
