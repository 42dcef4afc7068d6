//! `WebSocket` transport for realtime clients.
//!
//! Clients connect to `GET /ws?token=...`. The handshake token is optional;
//! a missing or rejected token yields an unauthenticated session. Every
//! frame is a JSON text message: inbound frames are handed to the
//! [`MessageRouter`](crate::handler::MessageRouter), outbound frames are
//! drained from the connection's queue in order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{debug, warn};
use transit_types::{ConnectionId, ServerMessage};

use crate::state::AppState;

/// Query string of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Handshake token.
    pub token: Option<String>,
}

/// Upgrade an HTTP request to a realtime session.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_connect(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

/// Drive one session until either side closes it.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let router = &state.router;
    let (id, mut outbound) = router.on_connect(token.as_deref()).await;

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(message) = queued else {
                    debug!(connection_id = %id, "outbound queue closed");
                    break;
                };
                if !send(&mut socket, id, &message).await {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = router.on_message(id, text.as_str()).await;
                        if let Err(e) = router.hub().send_to(id, reply).await {
                            warn!(connection_id = %id, error = %e, "reply not delivered");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(connection_id = %id, "pong failed");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection_id = %id, error = %e, "socket error");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames carry nothing for us.
                    }
                }
            }
        }
    }

    router.on_disconnect(id).await;
}

async fn send(socket: &mut WebSocket, id: ConnectionId, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(connection_id = %id, kind = message.kind(), error = %e, "failed to serialize message");
            return true;
        }
    };
    if socket.send(Message::Text(json.into())).await.is_err() {
        debug!(connection_id = %id, "send failed, closing session");
        return false;
    }
    true
}
