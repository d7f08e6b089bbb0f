// Best-effort notification channel, one room per open floorplan. The only
// contract is a short text telling other viewers which element id changed;
// nothing is reconciled or replayed, and send failures are swallowed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::AppState;

pub struct RoomState {
    pub broadcast: broadcast::Sender<(u64, String)>,
    next_viewer: AtomicU64,
}

impl RoomState {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(256);
        Self {
            broadcast,
            next_viewer: AtomicU64::new(0),
        }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

// Room registry keyed by floorplan id
pub type RoomRegistry = Arc<RwLock<HashMap<i64, Arc<RoomState>>>>;

pub fn create_room_registry() -> RoomRegistry {
    Arc::new(RwLock::new(HashMap::new()))
}

pub async fn floorplan_ws(
    ws: WebSocketUpgrade,
    Path(floorplan_id): Path<i64>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, floorplan_id, state))
}

async fn handle_socket(socket: WebSocket, floorplan_id: i64, state: AppState) {
    let (sender, mut receiver) = socket.split();

    let room = {
        let mut registry = state.rooms.write().await;
        registry
            .entry(floorplan_id)
            .or_insert_with(|| Arc::new(RoomState::new()))
            .clone()
    };

    let viewer_id = room.next_viewer.fetch_add(1, Ordering::Relaxed);
    let mut broadcast_rx = room.broadcast.subscribe();

    let sender = Arc::new(tokio::sync::Mutex::new(sender));
    let sender_clone = sender.clone();

    // Forward room notices to this viewer, skipping its own updates
    let broadcast_task = tokio::spawn(async move {
        while let Ok((origin, notice)) = broadcast_rx.recv().await {
            if origin == viewer_id {
                continue;
            }
            let mut sender = sender_clone.lock().await;
            if sender.send(Message::Text(notice)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match describe_update(&text) {
                Some(notice) => {
                    let _ = room.broadcast.send((viewer_id, notice));
                }
                // Malformed payloads earn the sender a generic notice; the
                // room never hears about them.
                None => {
                    let mut sender = sender.lock().await;
                    let _ = sender
                        .send(Message::Text("Invalid update received".to_string()))
                        .await;
                }
            },
            Message::Close(_) => break,
            Message::Ping(data) => {
                let mut sender = sender.lock().await;
                let _ = sender.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }

    broadcast_task.abort();
}

/// Turn a client update payload into the broadcast notice. Payloads must be
/// JSON objects carrying an element id.
fn describe_update(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let id = value.get("id")?.as_str()?;
    Some(format!("Element {id} updated"))
}
