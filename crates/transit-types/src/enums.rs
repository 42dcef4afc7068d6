//! Enumeration types for the Transit Live tracking service.
//!
//! All enums serialize as `snake_case` strings so the wire format matches
//! what clients and the persistence layer already speak.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Trip lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle status of a trip.
///
/// A trip enters [`TripStatus::Scheduled`] externally. The coordinator
/// flips it to [`TripStatus::InProgress`] when it starts simulating and to
/// [`TripStatus::Completed`] when the last segment is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum TripStatus {
    /// Planned but not yet picked up by the coordinator.
    Scheduled,
    /// Being simulated.
    InProgress,
    /// Reached the final stop.
    Completed,
    /// Cancelled by an operator; never simulated again.
    Cancelled,
    /// Running behind schedule beyond the delay threshold.
    Delayed,
}

impl TripStatus {
    /// Statuses the coordinator selects on every tick.
    pub const ACTIVE: [Self; 2] = [Self::Scheduled, Self::InProgress];

    /// Whether the coordinator should keep a simulator for this status.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::InProgress)
    }

    /// Canonical lowercase name, as stored and sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Delayed => "delayed",
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Category of a user notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum NotificationType {
    /// The user's bus is running late.
    Delay,
    /// The user's bus is arriving at a stop.
    Arrival,
    /// An operator-issued service alert.
    ServiceAlert,
}

impl NotificationType {
    /// Canonical lowercase name, as stored and sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::Arrival => "arrival",
            Self::ServiceAlert => "service_alert",
        }
    }
}

/// Priority level of a user notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum NotificationPriority {
    /// Informational only.
    Low,
    /// Default priority.
    Normal,
    /// Significant disruption.
    High,
    /// Requires immediate attention.
    Urgent,
}

impl NotificationPriority {
    /// Canonical lowercase name, as stored and sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

// ---------------------------------------------------------------------------
// Realtime channel
// ---------------------------------------------------------------------------

/// Severity of a system-wide alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// Degraded service.
    Warning,
    /// Outage or emergency.
    Critical,
}

/// What a subscription request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SubscriptionKind {
    /// Every trip running on a route.
    Route,
    /// A single trip.
    Trip,
    /// Notifications addressed to one user.
    User,
}

/// Operational status of a route, derived from its active trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RouteServiceStatus {
    /// Trips are running close to schedule.
    Active,
    /// Average delay across active trips exceeds the delay threshold.
    Disrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_status_wire_names() {
        let json = serde_json::to_string(&TripStatus::InProgress).unwrap_or_default();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(TripStatus::InProgress.as_str(), "in_progress");
    }

    #[test]
    fn only_scheduled_and_in_progress_are_active() {
        assert!(TripStatus::Scheduled.is_active());
        assert!(TripStatus::InProgress.is_active());
        assert!(!TripStatus::Completed.is_active());
        assert!(!TripStatus::Cancelled.is_active());
        assert!(!TripStatus::Delayed.is_active());
        assert!(TripStatus::ACTIVE.iter().all(|s| s.is_active()));
    }

    #[test]
    fn notification_type_wire_names() {
        let json = serde_json::to_string(&NotificationType::ServiceAlert).unwrap_or_default();
        assert_eq!(json, "\"service_alert\"");
    }
}
