//! Shared type definitions for the Transit Live tracking service.
//!
//! This crate is the single source of truth for the identifiers, domain
//! records and realtime wire messages used across the workspace. Wire types
//! flow downstream to `TypeScript` via `ts-rs` for web and mobile clients.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all entity identifiers
//! - [`enums`] -- Trip status, notification and subscription enums
//! - [`structs`] -- Routes, stops, trips, positions, notifications
//! - [`messages`] -- Inbound client control messages and outbound events

pub mod enums;
pub mod ids;
pub mod messages;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    AlertSeverity, NotificationPriority, NotificationType, RouteServiceStatus, SubscriptionKind,
    TripStatus,
};
pub use ids::{ConnectionId, NotificationId, RouteId, StopId, TripId, UserId};
pub use messages::{
    ClientMessage, ConnectionStatus, ErrorReply, NotificationAlert, RouteStatusUpdate,
    ServerMessage, StatusReport, SubscriptionAck, SystemAlert, TripUpdate,
};
pub use structs::{
    Coordinate, LatLng, NewNotification, Notification, RouteRecord, Stop, Trip, TripPosition,
};

#[cfg(test)]
mod tests {
    //! Binding generation for the client-facing types.

    #[test]
    fn export_bindings() {
        // ts-rs generates TypeScript bindings when types with
        // #[ts(export)] are used. The files are written to the
        // `bindings/` directory relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::RouteId::export_all();
        let _ = crate::ids::StopId::export_all();
        let _ = crate::ids::TripId::export_all();
        let _ = crate::ids::UserId::export_all();
        let _ = crate::ids::ConnectionId::export_all();
        let _ = crate::ids::NotificationId::export_all();

        // Enums
        let _ = crate::enums::TripStatus::export_all();
        let _ = crate::enums::NotificationType::export_all();
        let _ = crate::enums::NotificationPriority::export_all();
        let _ = crate::enums::AlertSeverity::export_all();
        let _ = crate::enums::SubscriptionKind::export_all();
        let _ = crate::enums::RouteServiceStatus::export_all();

        // Structs
        let _ = crate::structs::Coordinate::export_all();
        let _ = crate::structs::LatLng::export_all();
        let _ = crate::structs::Stop::export_all();
        let _ = crate::structs::RouteRecord::export_all();
        let _ = crate::structs::TripPosition::export_all();
        let _ = crate::structs::Trip::export_all();
        let _ = crate::structs::Notification::export_all();

        // Wire messages
        let _ = crate::messages::ClientMessage::export_all();
        let _ = crate::messages::ServerMessage::export_all();
    }
}
