//! Core entity structs for the Transit Live tracking service.
//!
//! These mirror the records owned by the persistence layer (routes, stops,
//! trips, notifications) plus the simulated position a trip carries while
//! it is in progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{NotificationPriority, NotificationType, TripStatus};
use crate::ids::{NotificationId, RouteId, StopId, TripId, UserId};

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Coordinate {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl Coordinate {
    /// Construct a coordinate from latitude and longitude.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Compact `{lat, lng}` location as sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LatLng {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl From<Coordinate> for LatLng {
    fn from(c: Coordinate) -> Self {
        Self {
            lat: c.latitude,
            lng: c.longitude,
        }
    }
}

/// A stop on one or more routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Stop {
    /// Stop identifier.
    pub id: StopId,
    /// Human-readable stop name.
    pub name: String,
    /// Where the stop is.
    pub location: Coordinate,
}

/// A route as the persistence layer stores it: an ordered list of stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RouteRecord {
    /// Route identifier.
    pub id: RouteId,
    /// Human-readable route name (e.g. "42 Crosstown").
    pub name: String,
    /// Stops in travel order.
    pub stops: Vec<StopId>,
}

// ---------------------------------------------------------------------------
// Trips
// ---------------------------------------------------------------------------

/// Simulated position of a trip, refreshed every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TripPosition {
    /// Interpolated vehicle location.
    pub location: Coordinate,
    /// Stop the vehicle is heading to.
    pub next_stop_id: StopId,
    /// Remaining distance on the current segment.
    pub distance_to_next_stop_km: f64,
    /// Estimated arrival at `next_stop_id`.
    pub estimated_arrival: DateTime<Utc>,
    /// When this position was computed.
    pub last_updated: DateTime<Utc>,
}

/// A single run of a vehicle along a route.
///
/// Owned by the persistence layer; the coordinator is the only writer
/// while the trip is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Trip {
    /// Trip identifier.
    pub id: TripId,
    /// Route the trip runs on.
    pub route_id: RouteId,
    /// Lifecycle status.
    pub status: TripStatus,
    /// Scheduled departure.
    pub start_time: DateTime<Utc>,
    /// Last simulated position, if the trip has started.
    pub current_position: Option<TripPosition>,
    /// Current delay estimate in minutes.
    pub delay_minutes: f64,
    /// Stop the vehicle is heading to, if started.
    pub next_stop_id: Option<StopId>,
    /// Stops already served, in order, without repeats.
    pub completed_stops: Vec<StopId>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// A persisted user notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Notification {
    /// Notification identifier.
    pub id: NotificationId,
    /// Recipient.
    pub user_id: UserId,
    /// Trip this notification is about, if any.
    pub trip_id: Option<TripId>,
    /// Route this notification is about, if any.
    pub route_id: Option<RouteId>,
    /// Category.
    pub notification_type: NotificationType,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Priority.
    pub priority: NotificationPriority,
    /// Whether the user has read it.
    pub is_read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A notification that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    /// Recipient.
    pub user_id: UserId,
    /// Trip this notification is about, if any.
    pub trip_id: Option<TripId>,
    /// Route this notification is about, if any.
    pub route_id: Option<RouteId>,
    /// Category.
    pub notification_type: NotificationType,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Priority.
    pub priority: NotificationPriority,
}

impl NewNotification {
    /// Attach an identifier and creation time, producing the stored record.
    pub fn into_notification(self, id: NotificationId, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id,
            user_id: self.user_id,
            trip_id: self.trip_id,
            route_id: self.route_id,
            notification_type: self.notification_type,
            title: self.title,
            message: self.message,
            priority: self.priority,
            is_read: false,
            created_at,
        }
    }
}
