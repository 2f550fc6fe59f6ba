//! WebSocket endpoint — one bidirectional text channel per session.
//!
//! Inbound frames are plain UTF-8 user text; outbound frames are the
//! orchestrator's JSON wire events. A writer task drains a bounded
//! channel into the socket, so transport backpressure propagates all the
//! way back to the agent loops. A disconnect just ends the loop; the
//! session stays alive for reconnect.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::orchestrator::{Orchestrator, WireEvent};
use crate::state::AppState;

const OUTBOUND_CAPACITY: usize = 64;

/// GET /ws/:session_id — upgrade to WebSocket.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sink, mut stream) = socket.split();

    if state.sessions.get(&session_id).is_none() {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "Session not found".into(),
            })))
            .await;
        return;
    }

    tracing::info!(session_id = %session_id, "client connected");

    // Writer task: serialize wire events onto the socket.
    let (out_tx, mut out_rx) = mpsc::channel::<WireEvent>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize wire event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let orchestrator = Orchestrator::new(state.clone(), session_id.clone());
    orchestrator.send_welcome(&out_tx).await;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::info!(session_id = %session_id, error = %e, "websocket read error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                tracing::debug!(session_id = %session_id, text = %text, "received user message");
                orchestrator.handle_user_message(&text, &out_tx).await;
                if state.sessions.get(&session_id).is_none() {
                    // Session killed mid-turn: stop reading, close cleanly.
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum automatically.
            _ => {}
        }
    }

    drop(out_tx);
    let _ = writer.await;
    tracing::info!(session_id = %session_id, "client disconnected");
}
