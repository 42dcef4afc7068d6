//! Persistence collaborator boundary.
//!
//! The coordinator never talks to a database directly. It reads active trips
//! and route geometry, writes simulated state back, and records delay
//! notifications through [`TripStore`]. Two implementations exist: the
//! in-memory [`InMemoryStore`](crate::memory::InMemoryStore) used for tests
//! and offline runs, and the `PostgreSQL` store in `transit-db`.
//!
//! Methods return boxed futures so the store can live behind
//! `Arc<dyn TripStore>` and be chosen at startup.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use transit_types::{
    NewNotification, Notification, NotificationType, RouteId, RouteRecord, Stop, StopId, Trip,
    TripId, TripPosition, TripStatus, UserId,
};

/// Future returned by every [`TripStore`] method.
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// A persistence failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backing store cannot be reached at all.
    #[error("persistence unavailable: {message}")]
    Unavailable {
        /// Driver or transport message.
        message: String,
    },

    /// A query ran but failed.
    #[error("persistence query failed: {message}")]
    Query {
        /// Driver message.
        message: String,
    },

    /// A stored row could not be mapped to a domain type.
    #[error("corrupt {entity} record: {message}")]
    Corrupt {
        /// Kind of record (e.g. `trip`).
        entity: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A write targeted a record that does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that missed.
        id: String,
    },

    /// The call did not finish within the configured bound.
    #[error("persistence call timed out after {timeout_ms} ms")]
    Timeout {
        /// The bound that was exceeded.
        timeout_ms: u64,
    },
}

/// Fields written back to a trip after a tick. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripPatch {
    /// New lifecycle status.
    pub status: Option<TripStatus>,
    /// New simulated position.
    pub current_position: Option<TripPosition>,
    /// New delay estimate in minutes.
    pub delay_minutes: Option<f64>,
    /// New next stop.
    pub next_stop_id: Option<StopId>,
    /// Full replacement for the served-stops list.
    pub completed_stops: Option<Vec<StopId>>,
}

impl TripPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.current_position.is_none()
            && self.delay_minutes.is_none()
            && self.next_stop_id.is_none()
            && self.completed_stops.is_none()
    }

    /// Apply the patch to an in-memory trip.
    pub fn apply_to(self, trip: &mut Trip) {
        if let Some(status) = self.status {
            trip.status = status;
        }
        if let Some(position) = self.current_position {
            trip.current_position = Some(position);
        }
        if let Some(delay) = self.delay_minutes {
            trip.delay_minutes = delay;
        }
        if let Some(next) = self.next_stop_id {
            trip.next_stop_id = Some(next);
        }
        if let Some(stops) = self.completed_stops {
            trip.completed_stops = stops;
        }
    }
}

/// Persistence operations the realtime core depends on.
pub trait TripStore: Send + Sync {
    /// Trips whose status is one of `statuses`.
    fn find_active_trips<'a>(&'a self, statuses: &'a [TripStatus]) -> StoreFuture<'a, Vec<Trip>>;

    /// Write the given fields of a trip.
    fn update_trip(&self, trip_id: TripId, patch: TripPatch) -> StoreFuture<'_, ()>;

    /// A route and its ordered stop ids.
    fn find_route(&self, route_id: RouteId) -> StoreFuture<'_, Option<RouteRecord>>;

    /// A stop and its coordinate.
    fn find_stop(&self, stop_id: StopId) -> StoreFuture<'_, Option<Stop>>;

    /// Users with an active subscription to a route.
    fn find_route_subscribers(&self, route_id: RouteId) -> StoreFuture<'_, Vec<UserId>>;

    /// An existing notification for the dedup key, if any.
    fn find_notification(
        &self,
        user_id: UserId,
        trip_id: TripId,
        notification_type: NotificationType,
    ) -> StoreFuture<'_, Option<Notification>>;

    /// Persist a new notification and return the stored record.
    fn insert_notification(&self, notification: NewNotification) -> StoreFuture<'_, Notification>;

    /// Delete notifications created before `before`, returning how many.
    fn purge_notifications(&self, before: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

/// Run a store call with an upper bound on its duration.
///
/// # Errors
///
/// The call's own error, or [`StoreError::Timeout`] if `limit` elapses.
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_elapsed| StoreError::Timeout {
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_types::Coordinate;

    fn trip() -> Trip {
        Trip {
            id: TripId::new(),
            route_id: RouteId::new(),
            status: TripStatus::Scheduled,
            start_time: Utc::now(),
            current_position: None,
            delay_minutes: 0.0,
            next_stop_id: None,
            completed_stops: Vec::new(),
        }
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let mut t = trip();
        let before = t.clone();
        let patch = TripPatch::default();
        assert!(patch.is_empty());
        patch.apply_to(&mut t);
        assert_eq!(t, before);
    }

    #[test]
    fn patch_overwrites_given_fields_only() {
        let mut t = trip();
        let stop = StopId::new();
        let now = Utc::now();
        let patch = TripPatch {
            status: Some(TripStatus::InProgress),
            current_position: Some(TripPosition {
                location: Coordinate::new(1.0, 2.0),
                next_stop_id: stop,
                distance_to_next_stop_km: 0.5,
                estimated_arrival: now,
                last_updated: now,
            }),
            delay_minutes: Some(3.0),
            next_stop_id: Some(stop),
            completed_stops: None,
        };
        patch.apply_to(&mut t);
        assert_eq!(t.status, TripStatus::InProgress);
        assert_eq!(t.next_stop_id, Some(stop));
        assert!((t.delay_minutes - 3.0).abs() < f64::EPSILON);
        assert!(t.completed_stops.is_empty());
        assert!(t.current_position.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_call_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        };
        let result = bounded(Duration::from_millis(50), slow).await;
        assert_eq!(result, Err(StoreError::Timeout { timeout_ms: 50 }));

        let fast = bounded(Duration::from_millis(50), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(fast, Ok(7));
    }

    #[test]
    fn status_patch() {
        let patch = TripPatch {
            status: Some(TripStatus::Completed),
            ..TripPatch::default()
        };
        assert_eq!(patch.status, Some(TripStatus::Completed));
        assert!(!patch.is_empty());
    }
}
