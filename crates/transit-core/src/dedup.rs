//! At-most-once delay notifications.
//!
//! A delay notification is keyed by `(user, trip, type)`. Before one is
//! created the store is checked for an existing row with the same key; if
//! there is one the request is suppressed, otherwise the row is inserted and
//! forwarded to the [`EventSink`]. The check and the insert run under a
//! per-key async lock so concurrent evaluations for the same key cannot
//! both pass the check.
//!
//! Keys for a trip are released when the trip retires. A new trip has a new
//! id and therefore a fresh key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use transit_types::{
    NewNotification, Notification, NotificationAlert, NotificationType, TripId, UserId,
};

use crate::sink::EventSink;
use crate::store::{StoreError, TripStore, bounded};

/// Identity of a notification for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    /// Recipient.
    pub user_id: UserId,
    /// Trip the notification is about.
    pub trip_id: TripId,
    /// Category.
    pub notification_type: NotificationType,
}

/// Result of a dedup-guarded create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// A new row was stored and forwarded.
    Created(Notification),
    /// A row with the same key already exists; nothing was done.
    Suppressed,
}

/// Why a guarded create failed.
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    /// Only trip-scoped notifications can be deduplicated.
    #[error("notification for user {user_id} has no trip")]
    MissingTrip {
        /// Intended recipient.
        user_id: UserId,
    },

    /// The store check or insert failed.
    #[error("notification store failed: {0}")]
    Store(#[from] StoreError),
}

/// Serialises check-then-create per dedup key.
pub struct NotificationDeduplicator {
    store: Arc<dyn TripStore>,
    sink: Arc<dyn EventSink>,
    io_timeout: Duration,
    locks: Mutex<HashMap<DedupKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for NotificationDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDeduplicator")
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl NotificationDeduplicator {
    /// Create a deduplicator writing to `store` and forwarding to `sink`.
    pub fn new(store: Arc<dyn TripStore>, sink: Arc<dyn EventSink>, io_timeout: Duration) -> Self {
        Self {
            store,
            sink,
            io_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create `notification` unless one with the same key exists.
    ///
    /// # Errors
    ///
    /// [`DedupError::MissingTrip`] if the notification has no trip, or
    /// [`DedupError::Store`] if the lookup or insert fails. A failed insert
    /// leaves no row, so the next evaluation tries again.
    pub async fn create_if_absent(
        &self,
        notification: NewNotification,
    ) -> Result<DedupOutcome, DedupError> {
        let trip_id = notification.trip_id.ok_or(DedupError::MissingTrip {
            user_id: notification.user_id,
        })?;
        let key = DedupKey {
            user_id: notification.user_id,
            trip_id,
            notification_type: notification.notification_type,
        };

        let key_lock = self.key_lock(key).await;
        let _guard = key_lock.lock().await;

        let existing = bounded(
            self.io_timeout,
            self.store
                .find_notification(key.user_id, key.trip_id, key.notification_type),
        )
        .await?;
        if existing.is_some() {
            tracing::debug!(
                user_id = %key.user_id,
                trip_id = %key.trip_id,
                kind = key.notification_type.as_str(),
                "duplicate notification suppressed"
            );
            return Ok(DedupOutcome::Suppressed);
        }

        let stored = bounded(self.io_timeout, self.store.insert_notification(notification)).await?;
        let report = self
            .sink
            .emit_notification(stored.user_id, alert_for(&stored))
            .await;
        tracing::info!(
            user_id = %stored.user_id,
            trip_id = %trip_id,
            notification_id = %stored.id,
            delivered = report.delivered,
            "notification created"
        );
        Ok(DedupOutcome::Created(stored))
    }

    /// Forget every key belonging to a retired trip.
    pub async fn release_trip(&self, trip_id: TripId) {
        self.locks.lock().await.retain(|key, _| key.trip_id != trip_id);
    }

    /// Number of keys currently tracked.
    pub async fn tracked_keys(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn key_lock(&self, key: DedupKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key).or_default())
    }
}

/// Wire form of a stored notification.
pub fn alert_for(notification: &Notification) -> NotificationAlert {
    NotificationAlert {
        user_id: notification.user_id,
        notification_id: notification.id,
        title: notification.title.clone(),
        message: notification.message.clone(),
        notification_type: notification.notification_type,
        priority: notification.priority,
        route_id: notification.route_id,
        trip_id: notification.trip_id,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::sink::RecordingSink;
    use transit_types::{NotificationPriority, RouteId};

    fn delay(user_id: UserId, trip_id: TripId) -> NewNotification {
        NewNotification {
            user_id,
            trip_id: Some(trip_id),
            route_id: Some(RouteId::new()),
            notification_type: NotificationType::Delay,
            title: String::from("Bus Delay Alert"),
            message: String::from("Your bus is delayed by 7 minutes"),
            priority: NotificationPriority::Normal,
        }
    }

    fn dedup() -> (Arc<InMemoryStore>, Arc<RecordingSink>, NotificationDeduplicator) {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let dedup =
            NotificationDeduplicator::new(store.clone(), sink.clone(), Duration::from_secs(1));
        (store, sink, dedup)
    }

    #[tokio::test]
    async fn second_create_is_suppressed() {
        let (store, sink, dedup) = dedup();
        let user = UserId::new();
        let trip = TripId::new();

        let first = dedup.create_if_absent(delay(user, trip)).await.unwrap();
        assert!(matches!(first, DedupOutcome::Created(_)));
        for _ in 0..5 {
            let again = dedup.create_if_absent(delay(user, trip)).await.unwrap();
            assert_eq!(again, DedupOutcome::Suppressed);
        }

        assert_eq!(store.notifications().await.len(), 1);
        assert_eq!(sink.notifications().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_insert_once() {
        let (store, sink, dedup) = dedup();
        let dedup = Arc::new(dedup);
        let user = UserId::new();
        let trip = TripId::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                tokio::spawn(async move { dedup.create_if_absent(delay(user, trip)).await })
            })
            .collect();

        let mut created = 0_u32;
        for handle in handles {
            if matches!(handle.await.unwrap().unwrap(), DedupOutcome::Created(_)) {
                created = created.saturating_add(1);
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.notifications().await.len(), 1);
        assert_eq!(sink.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn keys_are_per_user_and_trip() {
        let (store, _sink, dedup) = dedup();
        let (alice, bob) = (UserId::new(), UserId::new());
        let (t1, t2) = (TripId::new(), TripId::new());

        for (user, trip) in [(alice, t1), (bob, t1), (alice, t2)] {
            let outcome = dedup.create_if_absent(delay(user, trip)).await.unwrap();
            assert!(matches!(outcome, DedupOutcome::Created(_)));
        }
        assert_eq!(store.notifications().await.len(), 3);
    }

    #[tokio::test]
    async fn release_drops_trip_keys() {
        let (_store, _sink, dedup) = dedup();
        let trip = TripId::new();
        dedup.create_if_absent(delay(UserId::new(), trip)).await.unwrap();
        dedup
            .create_if_absent(delay(UserId::new(), TripId::new()))
            .await
            .unwrap();
        assert_eq!(dedup.tracked_keys().await, 2);
        dedup.release_trip(trip).await;
        assert_eq!(dedup.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn store_failure_creates_nothing() {
        let (store, sink, dedup) = dedup();
        store.set_available(false);
        let err = dedup
            .create_if_absent(delay(UserId::new(), TripId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::Store(StoreError::Unavailable { .. })));
        assert!(sink.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn trip_is_required() {
        let (_store, _sink, dedup) = dedup();
        let mut n = delay(UserId::new(), TripId::new());
        n.trip_id = None;
        assert!(matches!(
            dedup.create_if_absent(n).await,
            Err(DedupError::MissingTrip { .. })
        ));
    }
}
