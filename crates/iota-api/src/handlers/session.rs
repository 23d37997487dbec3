//! WebSocket session handler
//!
//! One reader task and one writer task per connection. Each request is
//! processed on its own task, so replies may arrive out of order; the
//! `request_id` ties a reply to its request.
//!
//! ```text
//! CONNECTED ──(close frame | transport error)──▶ CLOSED
//! ```

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use iota_core::protocol::{ClientEnvelope, ServerMessage};
use iota_gateway::broadcast::SessionSink;
use iota_gateway::{Gateway, SessionHandle};
use tokio::sync::mpsc;

use crate::state::AppState;

/// Outbound queue depth per session
pub const SESSION_QUEUE: usize = 64;

/// GET /ws
pub async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state.gateway))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, gateway: Gateway) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(SESSION_QUEUE);

    let handle = SessionHandle::new(peer.to_string(), tx.clone());
    let session_id = handle.session_id;

    // Greet before the session becomes visible to broadcasts
    let connected = ServerMessage::connected(session_id.to_string());
    if let Ok(json) = serde_json::to_string(&connected) {
        if ws_sender.send(Message::Text(json.into())).await.is_err() {
            tracing::debug!(peer = %peer, "Connection lost before greeting");
            return;
        }
    }
    gateway.sessions.register(handle);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => dispatch(&recv_gateway, &tx, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Transport error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.sessions.remove(&session_id);
}

/// Decode one frame and process it on its own task
async fn dispatch(gateway: &Gateway, tx: &SessionSink, text: &str) {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse session message");
            let _ = tx.send(ServerMessage::error(format!("invalid request: {}", e))).await;
            return;
        }
    };

    let handler = gateway.handler.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let ClientEnvelope { request_id, request } = envelope;
        tracing::debug!(request = request.name(), request_id = ?request_id, "Session request");
        let reply = handler.handle(request).await;
        if tx.send(ServerMessage::response(request_id, reply)).await.is_err() {
            tracing::debug!("Session closed before reply");
        }
    });
}
