//! Client session handling, independent of the transport.
//!
//! The `WebSocket` layer calls [`MessageRouter::on_connect`] once per
//! session, [`MessageRouter::on_message`] for every text frame and
//! [`MessageRouter::on_disconnect`] when the socket closes. Each inbound
//! frame is decoded into a [`ClientMessage`] and matched to the hub
//! operation of the same name; the result is a single reply addressed to
//! the requesting connection only.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;
use transit_types::{ClientMessage, ConnectionId, ServerMessage, SubscriptionKind};

use crate::error::HubError;
use crate::hub::ConnectionHub;

/// Routes client control messages to the hub.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    hub: Arc<ConnectionHub>,
}

impl MessageRouter {
    /// Create a router over `hub`.
    pub const fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }

    /// The hub this router drives.
    pub const fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// A session opened.
    pub async fn on_connect(
        &self,
        token: Option<&str>,
    ) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        self.hub.connect(token).await
    }

    /// A session closed.
    pub async fn on_disconnect(&self, id: ConnectionId) {
        self.hub.disconnect(id).await;
    }

    /// Decode one text frame and handle it.
    ///
    /// Malformed frames get an `error` reply; the connection stays open.
    pub async fn on_message(&self, id: ConnectionId, frame: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(frame) {
            Ok(message) => self.dispatch(id, message).await,
            Err(e) => {
                debug!(connection_id = %id, error = %e, "malformed client frame");
                reply_error(&HubError::InvalidRequest(e.to_string()))
            }
        }
    }

    /// Handle one decoded message.
    pub async fn dispatch(&self, id: ConnectionId, message: ClientMessage) -> ServerMessage {
        debug!(connection_id = %id, kind = message.kind(), "client message");
        let result = match message {
            ClientMessage::SubscribeRoute { route_id } => self
                .hub
                .subscribe_route(id, route_id)
                .await
                .map(|()| ServerMessage::confirmed(SubscriptionKind::Route, route_id.into_inner())),
            ClientMessage::UnsubscribeRoute { route_id } => self
                .hub
                .unsubscribe_route(id, route_id)
                .await
                .map(|()| ServerMessage::cancelled(SubscriptionKind::Route, route_id.into_inner())),
            ClientMessage::SubscribeTrip { trip_id } => self
                .hub
                .subscribe_trip(id, trip_id)
                .await
                .map(|()| ServerMessage::confirmed(SubscriptionKind::Trip, trip_id.into_inner())),
            ClientMessage::UnsubscribeTrip { trip_id } => self
                .hub
                .unsubscribe_trip(id, trip_id)
                .await
                .map(|()| ServerMessage::cancelled(SubscriptionKind::Trip, trip_id.into_inner())),
            ClientMessage::JoinUserRoom { user_id } => self
                .hub
                .join_user_room(id, user_id)
                .await
                .map(|()| ServerMessage::confirmed(SubscriptionKind::User, user_id.into_inner())),
            ClientMessage::Ping => Ok(ServerMessage::Pong {
                timestamp: Utc::now(),
            }),
            ClientMessage::GetStatus => self.hub.status(id).await.map(ServerMessage::StatusResponse),
        };
        result.unwrap_or_else(|e| reply_error(&e))
    }
}

fn reply_error(error: &HubError) -> ServerMessage {
    ServerMessage::error(error.to_string())
}
