//! Outbound event boundary between the coordinator and the realtime hub.
//!
//! The coordinator produces trip updates, route status aggregates and
//! notifications; it does not know who is listening. [`EventSink`] is the
//! seam the hub's broadcast dispatcher implements. Delivery failures never
//! propagate back: each emit returns a [`DispatchReport`] for logging only.

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use transit_types::{AlertSeverity, NotificationAlert, RouteStatusUpdate, TripUpdate, UserId};

/// How one emit fared across its recipients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections the event was queued for.
    pub delivered: usize,
    /// Connections whose delivery failed.
    pub failed: usize,
}

impl DispatchReport {
    /// Total recipients attempted.
    pub const fn recipients(self) -> usize {
        self.delivered.saturating_add(self.failed)
    }
}

/// Receives events produced by the simulation.
pub trait EventSink: Send + Sync {
    /// Deliver a trip update to the trip's and the route's subscribers.
    fn emit_trip_update(&self, update: TripUpdate) -> BoxFuture<'_, DispatchReport>;

    /// Deliver a notification to every connection of `user_id`.
    fn emit_notification(
        &self,
        user_id: UserId,
        alert: NotificationAlert,
    ) -> BoxFuture<'_, DispatchReport>;

    /// Deliver an alert to every live connection.
    fn emit_system_alert(
        &self,
        message: String,
        severity: AlertSeverity,
    ) -> BoxFuture<'_, DispatchReport>;

    /// Deliver a route aggregate to the route's subscribers.
    fn emit_route_status(&self, status: RouteStatusUpdate) -> BoxFuture<'_, DispatchReport>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit_trip_update(&self, _update: TripUpdate) -> BoxFuture<'_, DispatchReport> {
        Box::pin(async { DispatchReport::default() })
    }

    fn emit_notification(
        &self,
        _user_id: UserId,
        _alert: NotificationAlert,
    ) -> BoxFuture<'_, DispatchReport> {
        Box::pin(async { DispatchReport::default() })
    }

    fn emit_system_alert(
        &self,
        _message: String,
        _severity: AlertSeverity,
    ) -> BoxFuture<'_, DispatchReport> {
        Box::pin(async { DispatchReport::default() })
    }

    fn emit_route_status(&self, _status: RouteStatusUpdate) -> BoxFuture<'_, DispatchReport> {
        Box::pin(async { DispatchReport::default() })
    }
}

/// An event captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// A trip update.
    TripUpdate(TripUpdate),
    /// A user notification.
    Notification(UserId, NotificationAlert),
    /// A system alert.
    SystemAlert(String, AlertSeverity),
    /// A route aggregate.
    RouteStatus(RouteStatusUpdate),
}

/// Keeps every event in order, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub async fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().await.clone()
    }

    /// Recorded trip updates, in emit order.
    pub async fn trip_updates(&self) -> Vec<TripUpdate> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                SinkEvent::TripUpdate(u) => Some(u.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded notifications, in emit order.
    pub async fn notifications(&self) -> Vec<(UserId, NotificationAlert)> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Notification(user, alert) => Some((*user, alert.clone())),
                _ => None,
            })
            .collect()
    }

    /// Recorded route aggregates, in emit order.
    pub async fn route_statuses(&self) -> Vec<RouteStatusUpdate> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                SinkEvent::RouteStatus(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, event: SinkEvent) -> DispatchReport {
        self.events.lock().await.push(event);
        DispatchReport {
            delivered: 1,
            failed: 0,
        }
    }
}

impl EventSink for RecordingSink {
    fn emit_trip_update(&self, update: TripUpdate) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.record(SinkEvent::TripUpdate(update)))
    }

    fn emit_notification(
        &self,
        user_id: UserId,
        alert: NotificationAlert,
    ) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.record(SinkEvent::Notification(user_id, alert)))
    }

    fn emit_system_alert(
        &self,
        message: String,
        severity: AlertSeverity,
    ) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.record(SinkEvent::SystemAlert(message, severity)))
    }

    fn emit_route_status(&self, status: RouteStatusUpdate) -> BoxFuture<'_, DispatchReport> {
        Box::pin(self.record(SinkEvent::RouteStatus(status)))
    }
}
