//! In-memory [`TripStore`] for tests and offline runs.
//!
//! All data lives behind a single `tokio::sync::RwLock`. The store can be
//! switched offline with [`InMemoryStore::set_available`] to exercise the
//! persistence-outage paths, and it counts writes per trip so callers can
//! assert that a skipped trip was never touched.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use transit_types::{
    NewNotification, Notification, NotificationId, NotificationType, RouteId, RouteRecord, Stop,
    StopId, Trip, TripId, TripStatus, UserId,
};

use crate::store::{StoreError, StoreFuture, TripPatch, TripStore};

#[derive(Debug, Default)]
struct Tables {
    trips: BTreeMap<TripId, Trip>,
    routes: HashMap<RouteId, RouteRecord>,
    stops: HashMap<StopId, Stop>,
    route_subscribers: HashMap<RouteId, BTreeSet<UserId>>,
    notifications: Vec<Notification>,
    trip_writes: HashMap<TripId, u64>,
}

/// Process-local store backed by hash maps.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going offline (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Add or replace a route.
    pub async fn insert_route(&self, route: RouteRecord) {
        self.tables.write().await.routes.insert(route.id, route);
    }

    /// Add or replace a stop.
    pub async fn insert_stop(&self, stop: Stop) {
        self.tables.write().await.stops.insert(stop.id, stop);
    }

    /// Add or replace a trip.
    pub async fn insert_trip(&self, trip: Trip) {
        self.tables.write().await.trips.insert(trip.id, trip);
    }

    /// Record an active route subscription for a user.
    pub async fn subscribe_user(&self, route_id: RouteId, user_id: UserId) {
        self.tables
            .write()
            .await
            .route_subscribers
            .entry(route_id)
            .or_default()
            .insert(user_id);
    }

    /// Current copy of a trip.
    pub async fn trip(&self, trip_id: TripId) -> Option<Trip> {
        self.tables.read().await.trips.get(&trip_id).cloned()
    }

    /// All stored notifications.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.tables.read().await.notifications.clone()
    }

    /// Number of `update_trip` calls that reached a trip.
    pub async fn write_count(&self, trip_id: TripId) -> u64 {
        self.tables
            .read()
            .await
            .trip_writes
            .get(&trip_id)
            .copied()
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                message: String::from("in-memory store switched offline"),
            })
        }
    }
}

impl TripStore for InMemoryStore {
    fn find_active_trips<'a>(&'a self, statuses: &'a [TripStatus]) -> StoreFuture<'a, Vec<Trip>> {
        Box::pin(async move {
            self.check_available()?;
            let tables = self.tables.read().await;
            Ok(tables
                .trips
                .values()
                .filter(|t| statuses.contains(&t.status))
                .cloned()
                .collect())
        })
    }

    fn update_trip(&self, trip_id: TripId, patch: TripPatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut tables = self.tables.write().await;
            let trip = tables
                .trips
                .get_mut(&trip_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "trip",
                    id: trip_id.to_string(),
                })?;
            patch.apply_to(trip);
            let writes = tables.trip_writes.entry(trip_id).or_insert(0);
            *writes = writes.saturating_add(1);
            Ok(())
        })
    }

    fn find_route(&self, route_id: RouteId) -> StoreFuture<'_, Option<RouteRecord>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.tables.read().await.routes.get(&route_id).cloned())
        })
    }

    fn find_stop(&self, stop_id: StopId) -> StoreFuture<'_, Option<Stop>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.tables.read().await.stops.get(&stop_id).cloned())
        })
    }

    fn find_route_subscribers(&self, route_id: RouteId) -> StoreFuture<'_, Vec<UserId>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .tables
                .read()
                .await
                .route_subscribers
                .get(&route_id)
                .map(|users| users.iter().copied().collect())
                .unwrap_or_default())
        })
    }

    fn find_notification(
        &self,
        user_id: UserId,
        trip_id: TripId,
        notification_type: NotificationType,
    ) -> StoreFuture<'_, Option<Notification>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .tables
                .read()
                .await
                .notifications
                .iter()
                .find(|n| {
                    n.user_id == user_id
                        && n.trip_id == Some(trip_id)
                        && n.notification_type == notification_type
                })
                .cloned())
        })
    }

    fn insert_notification(&self, notification: NewNotification) -> StoreFuture<'_, Notification> {
        Box::pin(async move {
            self.check_available()?;
            let stored = notification.into_notification(NotificationId::new(), Utc::now());
            self.tables.write().await.notifications.push(stored.clone());
            Ok(stored)
        })
    }

    fn purge_notifications(&self, before: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.check_available()?;
            let mut tables = self.tables.write().await;
            let before_len = tables.notifications.len();
            tables.notifications.retain(|n| n.created_at >= before);
            let removed = before_len.saturating_sub(tables.notifications.len());
            Ok(u64::try_from(removed).unwrap_or(u64::MAX))
        })
    }
}
