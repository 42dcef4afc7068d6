//! Wire messages exchanged with realtime clients.
//!
//! Every frame on the client channel is a JSON object of the form
//! `{"type": "<event>", "data": {...}}`. Inbound frames decode to
//! [`ClientMessage`]; outbound frames encode from [`ServerMessage`].
//! Variants without a payload (e.g. `ping`) omit `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::enums::{
    AlertSeverity, NotificationPriority, NotificationType, RouteServiceStatus, SubscriptionKind,
    TripStatus,
};
use crate::ids::{NotificationId, RouteId, StopId, TripId, UserId};
use crate::structs::LatLng;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A control message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ClientMessage {
    /// Receive updates for every trip on a route.
    SubscribeRoute {
        /// Route to follow.
        route_id: RouteId,
    },
    /// Stop receiving route updates.
    UnsubscribeRoute {
        /// Route to drop.
        route_id: RouteId,
    },
    /// Receive updates for a single trip.
    SubscribeTrip {
        /// Trip to follow.
        trip_id: TripId,
    },
    /// Stop receiving trip updates.
    UnsubscribeTrip {
        /// Trip to drop.
        trip_id: TripId,
    },
    /// Receive notifications addressed to the authenticated user.
    JoinUserRoom {
        /// Must match the identity the connection authenticated as.
        user_id: UserId,
    },
    /// Liveness check; answered with `pong`.
    Ping,
    /// Ask for the connection's current subscription state.
    GetStatus,
}

impl ClientMessage {
    /// Event name of this message, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeRoute { .. } => "subscribe_route",
            Self::UnsubscribeRoute { .. } => "unsubscribe_route",
            Self::SubscribeTrip { .. } => "subscribe_trip",
            Self::UnsubscribeTrip { .. } => "unsubscribe_trip",
            Self::JoinUserRoom { .. } => "join_user_room",
            Self::Ping => "ping",
            Self::GetStatus => "get_status",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A message delivered to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Sent once, right after the handshake.
    ConnectionStatus(ConnectionStatus),
    /// Live position and delay of a trip.
    TripUpdate(TripUpdate),
    /// A notification addressed to the connection's user.
    Notification(NotificationAlert),
    /// A system-wide alert sent to every connection.
    SystemAlert(SystemAlert),
    /// Aggregate status of a route the connection follows.
    RouteStatus(RouteStatusUpdate),
    /// A subscription request succeeded.
    SubscriptionConfirmed(SubscriptionAck),
    /// An unsubscribe request succeeded.
    SubscriptionCancelled(SubscriptionAck),
    /// A request was rejected.
    Error(ErrorReply),
    /// Reply to `ping`.
    Pong {
        /// Server time of the reply.
        timestamp: DateTime<Utc>,
    },
    /// Reply to `get_status`.
    StatusResponse(StatusReport),
}

impl ServerMessage {
    /// Build an `error` reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorReply {
            message: message.into(),
        })
    }

    /// Build a `subscription_confirmed` reply.
    pub fn confirmed(kind: SubscriptionKind, id: Uuid) -> Self {
        Self::SubscriptionConfirmed(SubscriptionAck {
            kind,
            id,
            timestamp: Utc::now(),
        })
    }

    /// Build a `subscription_cancelled` reply.
    pub fn cancelled(kind: SubscriptionKind, id: Uuid) -> Self {
        Self::SubscriptionCancelled(SubscriptionAck {
            kind,
            id,
            timestamp: Utc::now(),
        })
    }

    /// Event name of this message, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionStatus(_) => "connection_status",
            Self::TripUpdate(_) => "trip_update",
            Self::Notification(_) => "notification",
            Self::SystemAlert(_) => "system_alert",
            Self::RouteStatus(_) => "route_status",
            Self::SubscriptionConfirmed(_) => "subscription_confirmed",
            Self::SubscriptionCancelled(_) => "subscription_cancelled",
            Self::Error(_) => "error",
            Self::Pong { .. } => "pong",
            Self::StatusResponse(_) => "status_response",
        }
    }
}

/// Live update for one trip, produced by every coordinator tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TripUpdate {
    /// Trip the update is about.
    pub trip_id: TripId,
    /// Route the trip runs on.
    pub route_id: RouteId,
    /// Last stop served, if any.
    pub current_stop_id: Option<StopId>,
    /// Stop the vehicle is heading to, if any.
    pub next_stop_id: Option<StopId>,
    /// Interpolated vehicle location.
    pub current_location: Option<LatLng>,
    /// Current speed in km/h.
    pub speed: Option<f64>,
    /// Bearing of travel in degrees (0 = north, clockwise).
    pub heading: Option<f64>,
    /// Current delay estimate in minutes.
    pub delay_minutes: f64,
    /// Status as shown to riders.
    pub status: TripStatus,
    /// When the update was produced.
    pub last_updated: DateTime<Utc>,
}

/// A notification pushed to a user's connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NotificationAlert {
    /// Recipient.
    pub user_id: UserId,
    /// Persisted notification this alert mirrors.
    pub notification_id: NotificationId,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Category.
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Priority.
    pub priority: NotificationPriority,
    /// Related route, if any.
    pub route_id: Option<RouteId>,
    /// Related trip, if any.
    pub trip_id: Option<TripId>,
}

/// A system-wide alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SystemAlert {
    /// Severity of the alert.
    pub alert_type: AlertSeverity,
    /// Alert text.
    pub message: String,
    /// When the alert was issued.
    pub timestamp: DateTime<Utc>,
}

/// Aggregate status of a route across its active trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RouteStatusUpdate {
    /// Route the status is about.
    pub route_id: RouteId,
    /// Derived operational status.
    pub status: RouteServiceStatus,
    /// Number of trips simulated on the route this tick.
    pub active_trips: u32,
    /// Mean delay across those trips, in minutes.
    pub average_delay_minutes: f64,
    /// When the status was computed.
    pub last_updated: DateTime<Utc>,
}

/// Acknowledgement of a (un)subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SubscriptionAck {
    /// What was (un)subscribed.
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    /// Identifier of the route, trip or user.
    pub id: Uuid,
    /// Server time of the acknowledgement.
    pub timestamp: DateTime<Utc>,
}

/// Reason a client request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ErrorReply {
    /// Human-readable reason.
    pub message: String,
}

/// Greeting sent right after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConnectionStatus {
    /// Always `true`.
    pub connected: bool,
    /// Whether the handshake token was accepted.
    pub authenticated: bool,
    /// Authenticated identity, if any.
    pub user_id: Option<UserId>,
    /// Server time of the handshake.
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of one connection's subscription state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StatusReport {
    /// Whether the connection is authenticated.
    pub authenticated: bool,
    /// Authenticated identity, if any.
    pub user_id: Option<UserId>,
    /// When the connection was established.
    pub connected_at: DateTime<Utc>,
    /// Routes the connection follows.
    pub subscribed_routes: Vec<RouteId>,
    /// Trips the connection follows.
    pub subscribed_trips: Vec<TripId>,
    /// Number of live connections on the hub.
    pub total_connections: u64,
}
