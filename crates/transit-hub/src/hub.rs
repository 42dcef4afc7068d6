//! The connection hub: session lifecycle, subscriptions and heartbeat.
//!
//! [`ConnectionHub`] is constructed once by the engine and shared by
//! reference. It owns the [`SubscriptionRegistry`] behind an async
//! read-write lock. Mutations take the write lock for the whole
//! connection-plus-index update; deliveries take the read lock only long
//! enough to copy the target list, then send outside the lock.
//!
//! Each connection has a bounded outbound queue. Messages are queued with
//! `try_send` so a slow client can never stall the tick loop; a full or
//! closed queue is a [`DeliveryError`] that is logged and otherwise
//! ignored. Connections are only removed by [`ConnectionHub::disconnect`]
//! (the socket closing, or the heartbeat expiring them).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock, mpsc};
use tracing::{debug, info, warn};
use transit_core::DispatchReport;
use transit_core::config::HubConfig;
use transit_types::{
    ConnectionId, ConnectionStatus, RouteId, ServerMessage, StatusReport, TripId, UserId,
};

use crate::auth::TokenVerifier;
use crate::error::{DeliveryError, HubError};
use crate::registry::{Connection, SubscriptionRegistry, Target};

/// Connection counters served by `/api/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Live connections.
    pub total_connections: usize,
    /// Connections with an accepted token.
    pub authenticated_connections: usize,
    /// Connections without one.
    pub anonymous_connections: usize,
    /// Distinct users with at least one connection.
    pub unique_users: usize,
    /// Distinct routes with at least one follower.
    pub route_subscriptions: usize,
    /// Distinct trips with at least one follower.
    pub trip_subscriptions: usize,
    /// Seconds since the hub was created.
    pub uptime_seconds: i64,
}

/// Live client sessions and their subscriptions.
pub struct ConnectionHub {
    config: HubConfig,
    registry: RwLock<SubscriptionRegistry>,
    verifier: Arc<dyn TokenVerifier>,
    started_at: DateTime<Utc>,
    stop_requested: AtomicBool,
    stop_notify: Notify,
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl ConnectionHub {
    /// Create an empty hub.
    pub fn new(config: HubConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config,
            registry: RwLock::new(SubscriptionRegistry::new()),
            verifier,
            started_at: Utc::now(),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register a new session.
    ///
    /// A token that fails verification is logged and the session is
    /// accepted unauthenticated. The `connection_status` greeting is the
    /// first message on the returned receiver.
    pub async fn connect(&self, token: Option<&str>) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = ConnectionId::new();
        let user_id = token.and_then(|t| match self.verifier.verify(t) {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                warn!(connection_id = %id, error = %e, "authentication failed, continuing unauthenticated");
                None
            }
        });

        let now = Utc::now();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let greeting = ServerMessage::ConnectionStatus(ConnectionStatus {
            connected: true,
            authenticated: user_id.is_some(),
            user_id,
            timestamp: now,
        });
        if let Err(e) = tx.try_send(greeting) {
            warn!(connection_id = %id, error = %e, "failed to queue greeting");
        }

        let total = {
            let mut registry = self.registry.write().await;
            registry.insert(Connection::new(id, user_id, now, tx));
            registry.len()
        };
        info!(
            connection_id = %id,
            authenticated = user_id.is_some(),
            total_connections = total,
            "client connected"
        );
        (id, rx)
    }

    /// Remove a session and every subscription it holds.
    ///
    /// Returns `false` if the session was already gone.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.registry.write().await.remove(id);
        match removed {
            Some(connection) => {
                info!(
                    connection_id = %id,
                    routes = connection.subscribed_routes.len(),
                    trips = connection.subscribed_trips.len(),
                    "client disconnected"
                );
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Follow every trip on a route.
    pub async fn subscribe_route(&self, id: ConnectionId, route_id: RouteId) -> Result<(), HubError> {
        self.registry.write().await.subscribe_route(id, route_id)?;
        info!(connection_id = %id, route_id = %route_id, "subscribed to route");
        Ok(())
    }

    /// Stop following a route.
    pub async fn unsubscribe_route(
        &self,
        id: ConnectionId,
        route_id: RouteId,
    ) -> Result<(), HubError> {
        self.registry.write().await.unsubscribe_route(id, route_id)?;
        info!(connection_id = %id, route_id = %route_id, "unsubscribed from route");
        Ok(())
    }

    /// Follow a single trip.
    pub async fn subscribe_trip(&self, id: ConnectionId, trip_id: TripId) -> Result<(), HubError> {
        self.registry.write().await.subscribe_trip(id, trip_id)?;
        info!(connection_id = %id, trip_id = %trip_id, "subscribed to trip");
        Ok(())
    }

    /// Stop following a trip.
    pub async fn unsubscribe_trip(&self, id: ConnectionId, trip_id: TripId) -> Result<(), HubError> {
        self.registry.write().await.unsubscribe_trip(id, trip_id)?;
        info!(connection_id = %id, trip_id = %trip_id, "unsubscribed from trip");
        Ok(())
    }

    /// Receive notifications for `user_id`. The connection must be
    /// authenticated as that user.
    pub async fn join_user_room(&self, id: ConnectionId, user_id: UserId) -> Result<(), HubError> {
        let result = self.registry.write().await.join_user(id, user_id);
        match &result {
            Ok(()) => info!(connection_id = %id, user_id = %user_id, "joined user room"),
            Err(e) => warn!(connection_id = %id, user_id = %user_id, error = %e, "user room join refused"),
        }
        result
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Subscription state of one connection.
    pub async fn status(&self, id: ConnectionId) -> Result<StatusReport, HubError> {
        let registry = self.registry.read().await;
        let connection = registry.get(id).ok_or(HubError::UnknownConnection(id))?;
        Ok(StatusReport {
            authenticated: connection.is_authenticated(),
            user_id: connection.user_id,
            connected_at: connection.connected_at,
            subscribed_routes: connection.subscribed_routes.iter().copied().collect(),
            subscribed_trips: connection.subscribed_trips.iter().copied().collect(),
            total_connections: u64::try_from(registry.len()).unwrap_or(u64::MAX),
        })
    }

    /// Connection counters.
    pub async fn stats(&self) -> HubStats {
        let registry = self.registry.read().await;
        let total = registry.len();
        let authenticated = registry.authenticated();
        HubStats {
            total_connections: total,
            authenticated_connections: authenticated,
            anonymous_connections: total.saturating_sub(authenticated),
            unique_users: registry.user_keys(),
            route_subscriptions: registry.route_keys(),
            trip_subscriptions: registry.trip_keys(),
            uptime_seconds: Utc::now().signed_duration_since(self.started_at).num_seconds(),
        }
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Copy a target list out of the registry under the read lock.
    pub async fn snapshot<F>(&self, select: F) -> Vec<Target>
    where
        F: FnOnce(&SubscriptionRegistry) -> Vec<Target>,
    {
        select(&*self.registry.read().await)
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Queue a message for one connection.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> Result<(), DeliveryError> {
        let outbox = self
            .registry
            .read()
            .await
            .get(id)
            .map(|c| c.outbox().clone())
            .ok_or(DeliveryError::Closed(id))?;
        queue(id, &outbox, message)
    }

    /// Queue `message` for every target independently.
    ///
    /// A failure on one target is logged and does not affect the rest.
    pub fn deliver(targets: &[Target], message: &ServerMessage) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, outbox) in targets {
            match queue(*id, outbox, message.clone()) {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(e) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(connection_id = %id, kind = message.kind(), error = %e, "delivery failed");
                }
            }
        }
        report
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Disconnect every session older than the configured maximum age.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let max_age_secs = i64::try_from(self.config.max_connection_age_secs).unwrap_or(i64::MAX);
        let max_age = TimeDelta::try_seconds(max_age_secs).unwrap_or(TimeDelta::MAX);
        let expired = self.registry.read().await.expired(now, max_age);
        let mut closed = 0_usize;
        for id in expired {
            if self.disconnect(id).await {
                debug!(connection_id = %id, "expired connection closed");
                closed = closed.saturating_add(1);
            }
        }
        closed
    }

    /// Run the heartbeat loop until [`request_stop`](Self::request_stop).
    pub async fn run_heartbeat(&self) {
        let period = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.stopped() => break,
                _ = interval.tick() => {}
            }
            let closed = self.sweep_expired(Utc::now()).await;
            let remaining = self.connection_count().await;
            if closed > 0 || remaining > 0 {
                info!(closed, active_connections = remaining, "heartbeat");
            }
        }
        debug!("heartbeat stopped");
    }

    /// Ask the heartbeat loop to stop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    async fn stopped(&self) {
        loop {
            let notified = self.stop_notify.notified();
            if self.stop_requested.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

fn queue(
    id: ConnectionId,
    outbox: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
) -> Result<(), DeliveryError> {
    outbox.try_send(message).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => DeliveryError::Full(id),
        mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(id),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;

    fn hub_with(user: UserId, buffer: usize) -> ConnectionHub {
        let verifier = StaticTokenVerifier::default().with_token("good", user);
        let config = HubConfig {
            outbound_buffer: buffer,
            ..HubConfig::default()
        };
        ConnectionHub::new(config, Arc::new(verifier))
    }

    #[tokio::test]
    async fn greeting_reports_authentication() {
        let user = UserId::new();
        let hub = hub_with(user, 8);

        let (_id, mut rx) = hub.connect(Some("good")).await;
        match rx.recv().await.unwrap() {
            ServerMessage::ConnectionStatus(status) => {
                assert!(status.connected);
                assert!(status.authenticated);
                assert_eq!(status.user_id, Some(user));
            }
            other => panic!("unexpected {other:?}"),
        }

        let (_id, mut rx) = hub.connect(Some("bad")).await;
        match rx.recv().await.unwrap() {
            ServerMessage::ConnectionStatus(status) => assert!(!status.authenticated),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(hub.stats().await.anonymous_connections, 1);
    }

    #[tokio::test]
    async fn disconnect_clears_every_index() {
        let user = UserId::new();
        let hub = hub_with(user, 8);
        let (id, _rx) = hub.connect(Some("good")).await;
        hub.subscribe_route(id, RouteId::new()).await.unwrap();
        hub.subscribe_trip(id, TripId::new()).await.unwrap();
        hub.join_user_room(id, user).await.unwrap();

        assert!(hub.disconnect(id).await);
        assert!(!hub.disconnect(id).await);
        let stats = hub.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.unique_users, 0);
        assert_eq!(stats.route_subscriptions, 0);
        assert_eq!(stats.trip_subscriptions, 0);
        hub.snapshot(|r| {
            r.check_consistency().unwrap();
            Vec::new()
        })
        .await;
    }

    #[tokio::test]
    async fn full_queue_is_a_delivery_error_not_a_disconnect() {
        let hub = hub_with(UserId::new(), 1);
        // The greeting fills the single slot.
        let (id, _rx) = hub.connect(None).await;
        let err = hub.send_to(id, ServerMessage::error("x")).await.unwrap_err();
        assert_eq!(err, DeliveryError::Full(id));
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn deliver_isolates_failures() {
        let hub = hub_with(UserId::new(), 4);
        let (closed_id, closed_rx) = hub.connect(None).await;
        let (open_id, mut open_rx) = hub.connect(None).await;
        drop(closed_rx);
        open_rx.recv().await.unwrap();

        let targets = hub.snapshot(SubscriptionRegistry::all_targets).await;
        let report = ConnectionHub::deliver(&targets, &ServerMessage::error("hello"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(matches!(open_rx.recv().await.unwrap(), ServerMessage::Error(_)));
        assert!(hub.status(closed_id).await.is_ok());
        assert!(hub.status(open_id).await.is_ok());
    }

    #[tokio::test]
    async fn status_lists_subscriptions() {
        let hub = hub_with(UserId::new(), 8);
        let (id, _rx) = hub.connect(None).await;
        let route = RouteId::new();
        hub.subscribe_route(id, route).await.unwrap();

        let status = hub.status(id).await.unwrap();
        assert!(!status.authenticated);
        assert_eq!(status.subscribed_routes, vec![route]);
        assert!(status.subscribed_trips.is_empty());
        assert_eq!(status.total_connections, 1);

        let ghost = ConnectionId::new();
        assert_eq!(hub.status(ghost).await, Err(HubError::UnknownConnection(ghost)));
    }

    #[tokio::test]
    async fn sweep_closes_old_connections() {
        let hub = hub_with(UserId::new(), 8);
        let (id, _rx) = hub.connect(None).await;
        hub.subscribe_trip(id, TripId::new()).await.unwrap();

        assert_eq!(hub.sweep_expired(Utc::now()).await, 0);
        let later = Utc::now()
            .checked_add_signed(TimeDelta::hours(2))
            .unwrap();
        assert_eq!(hub.sweep_expired(later).await, 1);
        assert_eq!(hub.stats().await.trip_subscriptions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_stops_on_request() {
        let hub = Arc::new(hub_with(UserId::new(), 8));
        let task = tokio::spawn({
            let hub = Arc::clone(&hub);
            async move { hub.run_heartbeat().await }
        });
        tokio::time::sleep(Duration::from_secs(180)).await;
        hub.request_stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
