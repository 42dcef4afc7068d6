//! Delivery of simulation events to subscribed connections.
//!
//! [`BroadcastDispatcher`] is the hub side of [`EventSink`]. For every event
//! it copies the matching subscriber set out of the registry under the read
//! lock and then queues the message to each target outside the lock, so a
//! concurrent subscribe or disconnect can never be observed half applied.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info};
use transit_core::{DispatchReport, EventSink};
use transit_types::{
    AlertSeverity, NotificationAlert, RouteStatusUpdate, ServerMessage, SystemAlert, TripUpdate,
    UserId,
};

use crate::hub::ConnectionHub;
use crate::registry::SubscriptionRegistry;

/// Fans simulation events out through a [`ConnectionHub`].
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    hub: Arc<ConnectionHub>,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over `hub`.
    pub const fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }

    async fn trip_update(&self, update: TripUpdate) -> DispatchReport {
        let (trip_id, route_id) = (update.trip_id, update.route_id);
        let targets = self
            .hub
            .snapshot(|r| r.trip_update_targets(trip_id, route_id))
            .await;
        let report = ConnectionHub::deliver(&targets, &ServerMessage::TripUpdate(update));
        debug!(trip_id = %trip_id, delivered = report.delivered, failed = report.failed, "trip update dispatched");
        report
    }

    async fn notification(&self, user_id: UserId, alert: NotificationAlert) -> DispatchReport {
        let targets = self.hub.snapshot(|r| r.user_targets(user_id)).await;
        let report = ConnectionHub::deliver(&targets, &ServerMessage::Notification(alert));
        debug!(user_id = %user_id, delivered = report.delivered, "notification dispatched");
        report
    }

    async fn system_alert(&self, message: String, severity: AlertSeverity) -> DispatchReport {
        let targets = self.hub.snapshot(SubscriptionRegistry::all_targets).await;
        let alert = ServerMessage::SystemAlert(SystemAlert {
            alert_type: severity,
            message,
            timestamp: Utc::now(),
        });
        let report = ConnectionHub::deliver(&targets, &alert);
        info!(severity = ?severity, delivered = report.delivered, "system alert dispatched");
        report
    }

    async fn route_status(&self, status: RouteStatusUpdate) -> DispatchReport {
        let route_id = status.route_id;
        let targets = self.hub.snapshot(|r| r.route_targets(route_id)).await;
        ConnectionHub::deliver(&targets, &ServerMessage::RouteStatus(status))
    }
}

impl EventSink for BroadcastDispatcher {
    fn emit_trip_update(&self, update: TripUpdate) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.trip_update(update))
    }

    fn emit_notification(
        &self,
        user_id: UserId,
        alert: NotificationAlert,
    ) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.notification(user_id, alert))
    }

    fn emit_system_alert(
        &self,
        message: String,
        severity: AlertSeverity,
    ) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.system_alert(message, severity))
    }

    fn emit_route_status(&self, status: RouteStatusUpdate) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.route_status(status))
    }
}
