//! `PostgreSQL` implementation of [`TripStore`].
//!
//! Enumerations are stored as their lowercase wire names in `TEXT`
//! columns; a simulated position is stored as `JSONB`. Rows that carry a
//! name the domain does not know are reported as [`DbError::Corrupt`]
//! instead of being silently dropped.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use transit_core::{StoreError, StoreFuture, TripPatch, TripStore};
use transit_types::{
    Coordinate, NewNotification, Notification, NotificationId, NotificationPriority,
    NotificationType, RouteId, RouteRecord, Stop, StopId, Trip, TripId, TripPosition, TripStatus,
    UserId,
};
use uuid::Uuid;

use crate::error::DbError;

/// Trip, route, stop, subscription and notification queries over one pool.
#[derive(Debug, Clone)]
pub struct PgTripStore {
    pool: PgPool,
}

impl PgTripStore {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Trips whose status is one of `statuses`, oldest departure first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Corrupt`] if a row cannot be mapped.
    pub async fn active_trips(&self, statuses: &[TripStatus]) -> Result<Vec<Trip>, DbError> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_owned()).collect();
        let rows = sqlx::query_as::<_, TripRow>(
            r"SELECT id, route_id, status, trip_start_time, current_position, delay_minutes, next_stop_id, completed_stops
              FROM trips
              WHERE status = ANY($1)
              ORDER BY trip_start_time, id",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = rows.len(), "Loaded active trips");
        rows.into_iter().map(TripRow::into_trip).collect()
    }

    /// Write the fields set in `patch`; unset fields keep their value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if no trip has this id, or
    /// [`DbError::Postgres`] if the update fails.
    pub async fn patch_trip(&self, trip_id: TripId, patch: TripPatch) -> Result<(), DbError> {
        let status = patch.status.map(TripStatus::as_str);
        let position = patch.current_position.map(Json);
        let next_stop = patch.next_stop_id.map(StopId::into_inner);
        let completed: Option<Vec<Uuid>> = patch
            .completed_stops
            .map(|stops| stops.into_iter().map(StopId::into_inner).collect());

        let result = sqlx::query(
            r"UPDATE trips SET
                  status = COALESCE($2, status),
                  current_position = COALESCE($3, current_position),
                  delay_minutes = COALESCE($4, delay_minutes),
                  next_stop_id = COALESCE($5, next_stop_id),
                  completed_stops = COALESCE($6, completed_stops),
                  updated_at = now()
              WHERE id = $1",
        )
        .bind(trip_id.into_inner())
        .bind(status)
        .bind(position)
        .bind(patch.delay_minutes)
        .bind(next_stop)
        .bind(completed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound {
                entity: "trip",
                id: trip_id.to_string(),
            });
        }
        Ok(())
    }

    /// A route and its stops in travel order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if either query fails.
    pub async fn route(&self, route_id: RouteId) -> Result<Option<RouteRecord>, DbError> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as(r"SELECT id, name FROM routes WHERE id = $1")
                .bind(route_id.into_inner())
                .fetch_optional(&self.pool)
                .await?;
        let Some((id, name)) = row else {
            return Ok(None);
        };

        let stops: Vec<Uuid> = sqlx::query_scalar(
            r"SELECT stop_id FROM route_stops WHERE route_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(RouteRecord {
            id: RouteId::from(id),
            name,
            stops: stops.into_iter().map(StopId::from).collect(),
        }))
    }

    /// A single stop.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn stop(&self, stop_id: StopId) -> Result<Option<Stop>, DbError> {
        let row = sqlx::query_as::<_, StopRow>(
            r"SELECT id, name, latitude, longitude FROM stops WHERE id = $1",
        )
        .bind(stop_id.into_inner())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StopRow::into_stop))
    }

    /// Users with an active subscription to the route.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn route_subscribers(&self, route_id: RouteId) -> Result<Vec<UserId>, DbError> {
        let users: Vec<Uuid> = sqlx::query_scalar(
            r"SELECT user_id FROM subscriptions
              WHERE route_id = $1 AND is_active
              ORDER BY user_id",
        )
        .bind(route_id.into_inner())
        .fetch_all(&self.pool)
        .await?;
        Ok(users.into_iter().map(UserId::from).collect())
    }

    /// The most recent notification for a dedup key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Corrupt`] if the row cannot be mapped.
    pub async fn latest_notification(
        &self,
        user_id: UserId,
        trip_id: TripId,
        notification_type: NotificationType,
    ) -> Result<Option<Notification>, DbError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r"SELECT id, user_id, trip_id, route_id, notification_type, title, message, priority, is_read, created_at
              FROM notifications
              WHERE user_id = $1 AND trip_id = $2 AND notification_type = $3
              ORDER BY created_at DESC
              LIMIT 1",
        )
        .bind(user_id.into_inner())
        .bind(trip_id.into_inner())
        .bind(notification_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(NotificationRow::into_notification).transpose()
    }

    /// Insert a notification with a fresh id and the current time.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, DbError> {
        let stored = notification.into_notification(NotificationId::new(), Utc::now());

        sqlx::query(
            r"INSERT INTO notifications (id, user_id, trip_id, route_id, notification_type, title, message, priority, is_read, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(stored.id.into_inner())
        .bind(stored.user_id.into_inner())
        .bind(stored.trip_id.map(TripId::into_inner))
        .bind(stored.route_id.map(RouteId::into_inner))
        .bind(stored.notification_type.as_str())
        .bind(&stored.title)
        .bind(&stored.message)
        .bind(stored.priority.as_str())
        .bind(stored.is_read)
        .bind(stored.created_at)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Delete notifications created before `before`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn delete_notifications_before(&self, before: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query(r"DELETE FROM notifications WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        tracing::debug!(deleted = result.rows_affected(), %before, "Purged notifications");
        Ok(result.rows_affected())
    }
}

impl TripStore for PgTripStore {
    fn find_active_trips<'a>(&'a self, statuses: &'a [TripStatus]) -> StoreFuture<'a, Vec<Trip>> {
        Box::pin(async move { self.active_trips(statuses).await.map_err(StoreError::from) })
    }

    fn update_trip(&self, trip_id: TripId, patch: TripPatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.patch_trip(trip_id, patch)
                .await
                .map_err(StoreError::from)
        })
    }

    fn find_route(&self, route_id: RouteId) -> StoreFuture<'_, Option<RouteRecord>> {
        Box::pin(async move { self.route(route_id).await.map_err(StoreError::from) })
    }

    fn find_stop(&self, stop_id: StopId) -> StoreFuture<'_, Option<Stop>> {
        Box::pin(async move { self.stop(stop_id).await.map_err(StoreError::from) })
    }

    fn find_route_subscribers(&self, route_id: RouteId) -> StoreFuture<'_, Vec<UserId>> {
        Box::pin(async move {
            self.route_subscribers(route_id)
                .await
                .map_err(StoreError::from)
        })
    }

    fn find_notification(
        &self,
        user_id: UserId,
        trip_id: TripId,
        notification_type: NotificationType,
    ) -> StoreFuture<'_, Option<Notification>> {
        Box::pin(async move {
            self.latest_notification(user_id, trip_id, notification_type)
                .await
                .map_err(StoreError::from)
        })
    }

    fn insert_notification(&self, notification: NewNotification) -> StoreFuture<'_, Notification> {
        Box::pin(async move {
            self.create_notification(notification)
                .await
                .map_err(StoreError::from)
        })
    }

    fn purge_notifications(&self, before: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.delete_notifications_before(before)
                .await
                .map_err(StoreError::from)
        })
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A row from the `trips` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    route_id: Uuid,
    status: String,
    trip_start_time: DateTime<Utc>,
    current_position: Option<Json<TripPosition>>,
    delay_minutes: f64,
    next_stop_id: Option<Uuid>,
    completed_stops: Vec<Uuid>,
}

impl TripRow {
    fn into_trip(self) -> Result<Trip, DbError> {
        Ok(Trip {
            id: TripId::from(self.id),
            route_id: RouteId::from(self.route_id),
            status: trip_status_from_db(&self.status)?,
            start_time: self.trip_start_time,
            current_position: self.current_position.map(|Json(p)| p),
            delay_minutes: self.delay_minutes,
            next_stop_id: self.next_stop_id.map(StopId::from),
            completed_stops: self.completed_stops.into_iter().map(StopId::from).collect(),
        })
    }
}

/// A row from the `stops` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StopRow {
    id: Uuid,
    name: String,
    latitude: f64,
    longitude: f64,
}

impl StopRow {
    fn into_stop(self) -> Stop {
        Stop {
            id: StopId::from(self.id),
            name: self.name,
            location: Coordinate::new(self.latitude, self.longitude),
        }
    }
}

/// A row from the `notifications` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    trip_id: Option<Uuid>,
    route_id: Option<Uuid>,
    notification_type: String,
    title: String,
    message: String,
    priority: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_notification(self) -> Result<Notification, DbError> {
        Ok(Notification {
            id: NotificationId::from(self.id),
            user_id: UserId::from(self.user_id),
            trip_id: self.trip_id.map(TripId::from),
            route_id: self.route_id.map(RouteId::from),
            notification_type: notification_type_from_db(&self.notification_type)?,
            title: self.title,
            message: self.message,
            priority: priority_from_db(&self.priority)?,
            is_read: self.is_read,
            created_at: self.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

fn trip_status_from_db(s: &str) -> Result<TripStatus, DbError> {
    match s {
        "scheduled" => Ok(TripStatus::Scheduled),
        "in_progress" => Ok(TripStatus::InProgress),
        "completed" => Ok(TripStatus::Completed),
        "cancelled" => Ok(TripStatus::Cancelled),
        "delayed" => Ok(TripStatus::Delayed),
        other => Err(corrupt("trip", "status", other)),
    }
}

fn notification_type_from_db(s: &str) -> Result<NotificationType, DbError> {
    match s {
        "delay" => Ok(NotificationType::Delay),
        "arrival" => Ok(NotificationType::Arrival),
        "service_alert" => Ok(NotificationType::ServiceAlert),
        other => Err(corrupt("notification", "notification_type", other)),
    }
}

fn priority_from_db(s: &str) -> Result<NotificationPriority, DbError> {
    match s {
        "low" => Ok(NotificationPriority::Low),
        "normal" => Ok(NotificationPriority::Normal),
        "high" => Ok(NotificationPriority::High),
        "urgent" => Ok(NotificationPriority::Urgent),
        other => Err(corrupt("notification", "priority", other)),
    }
}

fn corrupt(entity: &'static str, column: &str, value: &str) -> DbError {
    DbError::Corrupt {
        entity,
        message: format!("unknown {column} '{value}'"),
    }
}
