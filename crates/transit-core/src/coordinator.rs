//! The simulation coordinator: tick loop, trip lifecycle and fan-out.
//!
//! One coordinator owns every active [`TripSimulator`]. Each tick runs the
//! following phases in order:
//!
//! 1. **Select** -- read trips with status `scheduled` or `in_progress`.
//! 2. **Retire** -- drop simulators whose trips left the active set.
//! 3. **Create** -- build a simulator for each new trip via
//!    [`RouteGeometry`]; trips without usable geometry are skipped.
//! 4. **Advance** -- move each simulator by one tick, handling segment and
//!    trip completion.
//! 5. **Estimate** -- refine the delay with the external predictor.
//! 6. **Persist** -- write position, delay, next stop, completed stops and
//!    status back to the store.
//! 7. **Emit** -- send a trip update, then delay notifications through the
//!    deduplicator when the delay is strictly above the threshold.
//! 8. **Aggregate** -- emit one route status per route touched this tick.
//!    Trips that completed on this tick are not counted as active.
//! 9. **Evict** -- drop cached geometry for routes left with no simulator.
//!
//! Trips are processed sequentially so writes for one trip are ordered by
//! tick. A failure in one trip is logged with the trip id and does not stop
//! the others. A failure of the whole tick (the active-trip query) is
//! logged, counted, and followed by a backoff; the loop itself only ends on
//! [`SimulationCoordinator::request_stop`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, Timelike, Utc};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use transit_sim::{SegmentTransition, SimulationStepError, SimulatorConfig, TripSimulator, delay};
use transit_types::{
    AlertSeverity, LatLng, NewNotification, NotificationPriority, NotificationType, RouteId,
    RouteServiceStatus, RouteStatusUpdate, Trip, TripId, TripStatus, TripUpdate, UserId,
};

use crate::config::{NotificationConfig, PredictorConfig, SimulationSettings, TransitConfig};
use crate::dedup::{DedupOutcome, NotificationDeduplicator};
use crate::geometry::{ResolveError, RouteGeometry};
use crate::predictor::{DelayEstimator, EstimatorError, PredictionRequest};
use crate::sink::EventSink;
use crate::store::{StoreError, TripPatch, TripStore, bounded};

/// A failure that aborts a whole tick.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The active-trip query failed.
    #[error("failed to load active trips: {source}")]
    ActiveTrips {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}

/// A failure confined to one trip for one tick.
#[derive(Debug, thiserror::Error)]
pub enum TripError {
    /// The route lookup failed at the store.
    #[error("geometry lookup failed: {0}")]
    Geometry(#[source] StoreError),

    /// The simulator could not be advanced or resumed.
    #[error("simulation step failed: {0}")]
    Step(#[from] SimulationStepError),

    /// The trip write failed.
    #[error("trip write failed: {0}")]
    Persist(#[source] StoreError),
}

/// Counts for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Active trips returned by the store.
    pub trips_seen: usize,
    /// Trips advanced and persisted.
    pub advanced: usize,
    /// Trips that reached their final stop.
    pub completed: usize,
    /// Trips skipped for lack of geometry.
    pub skipped: usize,
    /// Trips whose processing failed.
    pub failed: usize,
    /// Simulators dropped because their trip left the active set.
    pub retired: usize,
    /// Delay notifications created.
    pub notifications_created: usize,
}

/// Snapshot of the coordinator for health and stats endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Whether the tick loop is running.
    pub running: bool,
    /// Ticks that completed without a loop-level failure.
    pub ticks_completed: u64,
    /// Simulators currently held.
    pub active_simulators: usize,
    /// When the last successful tick finished.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Loop-level failures since the last successful tick.
    pub consecutive_failed_ticks: u64,
    /// Whether the last active-trip query succeeded.
    pub persistence_reachable: bool,
}

/// What happened to one trip this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TripOutcome {
    Skipped,
    Advanced { route_id: RouteId, delay: f64 },
    Completed { route_id: RouteId },
}

/// Per-tick constants.
#[derive(Debug, Clone, Copy)]
struct TickContext {
    now: DateTime<Utc>,
    hour: u32,
    dt_seconds: f64,
}

/// Owns and drives every active trip simulator.
pub struct SimulationCoordinator {
    settings: SimulationSettings,
    min_confidence: f64,
    retention: NotificationConfig,
    store: Arc<dyn TripStore>,
    geometry: RouteGeometry,
    estimator: DelayEstimator,
    sink: Arc<dyn EventSink>,
    dedup: NotificationDeduplicator,
    simulators: Mutex<BTreeMap<TripId, TripSimulator>>,
    rng: Mutex<SmallRng>,

    running: AtomicBool,
    stop_requested: AtomicBool,
    stop_notify: Notify,
    ticks_completed: AtomicU64,
    consecutive_failed_ticks: AtomicU64,
    active_simulators: AtomicUsize,
    persistence_reachable: AtomicBool,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for SimulationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationCoordinator")
            .field("settings", &self.settings)
            .field("estimator", &self.estimator.name())
            .finish_non_exhaustive()
    }
}

impl SimulationCoordinator {
    /// Build a coordinator. Nothing runs until [`run`](Self::run) or
    /// [`tick`](Self::tick) is called.
    pub fn new(
        config: &TransitConfig,
        store: Arc<dyn TripStore>,
        estimator: DelayEstimator,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_parts(
            config.simulation.clone(),
            &config.predictor,
            config.notifications.clone(),
            store,
            estimator,
            sink,
        )
    }

    fn with_parts(
        settings: SimulationSettings,
        predictor: &PredictorConfig,
        retention: NotificationConfig,
        store: Arc<dyn TripStore>,
        estimator: DelayEstimator,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let geometry = RouteGeometry::new(Arc::clone(&store), settings.base_speed_kmh);
        let dedup = NotificationDeduplicator::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            settings.io_timeout(),
        );
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(settings.seed)),
            min_confidence: predictor.min_confidence,
            retention,
            store,
            geometry,
            estimator,
            sink,
            dedup,
            simulators: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            ticks_completed: AtomicU64::new(0),
            consecutive_failed_ticks: AtomicU64::new(0),
            active_simulators: AtomicUsize::new(0),
            persistence_reachable: AtomicBool::new(true),
            last_tick_at: RwLock::new(None),
            settings,
        }
    }

    // -----------------------------------------------------------------------
    // Loop control
    // -----------------------------------------------------------------------

    /// Run the tick loop until [`request_stop`](Self::request_stop).
    pub async fn run(&self) {
        self.running.store(true, Ordering::Release);
        info!(
            tick_interval_ms = self.settings.tick_interval_ms,
            base_speed_kmh = self.settings.base_speed_kmh,
            estimator = self.estimator.name(),
            "Simulation coordinator started"
        );

        let mut interval = tokio::time::interval(self.settings.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.stopped() => break,
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(summary) => {
                    debug!(
                        trips = summary.trips_seen,
                        advanced = summary.advanced,
                        completed = summary.completed,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        "tick complete"
                    );
                }
                Err(e) => {
                    let failures = self.consecutive_failed_ticks.load(Ordering::Acquire);
                    error!(error = %e, consecutive_failures = failures, "tick failed, backing off");
                    tokio::select! {
                        () = self.stopped() => break,
                        () = tokio::time::sleep(self.settings.error_backoff()) => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!(
            ticks = self.ticks_completed.load(Ordering::Acquire),
            "Simulation coordinator stopped"
        );
    }

    /// Ask the tick and retention loops to stop after their current step.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Request a stop and wait up to the shutdown grace period for `task`
    /// (the spawned [`run`](Self::run) future) to finish. The task is
    /// aborted if it overruns.
    pub async fn shutdown(&self, mut task: JoinHandle<()>) {
        self.request_stop();
        match tokio::time::timeout(self.settings.shutdown_grace(), &mut task).await {
            Ok(Ok(())) => info!("coordinator shut down cleanly"),
            Ok(Err(e)) => error!(error = %e, "coordinator task ended abnormally"),
            Err(_elapsed) => {
                warn!(
                    grace_ms = self.settings.shutdown_grace_ms,
                    "coordinator overran shutdown grace period, aborting"
                );
                task.abort();
            }
        }
    }

    async fn stopped(&self) {
        loop {
            let notified = self.stop_notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            running: self.running.load(Ordering::Acquire),
            ticks_completed: self.ticks_completed.load(Ordering::Acquire),
            active_simulators: self.active_simulators.load(Ordering::Acquire),
            last_tick_at: *self.last_tick_at.read().await,
            consecutive_failed_ticks: self.consecutive_failed_ticks.load(Ordering::Acquire),
            persistence_reachable: self.persistence_reachable.load(Ordering::Acquire),
        }
    }

    /// Whether the last active-trip query reached the store.
    pub fn persistence_reachable(&self) -> bool {
        self.persistence_reachable.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::ActiveTrips`] if the active-trip query
    /// fails. Per-trip failures are logged and counted in the summary.
    pub async fn tick(&self) -> Result<TickSummary, CoordinatorError> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as if the wall clock read `now`.
    ///
    /// # Errors
    ///
    /// Same as [`tick`](Self::tick).
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, CoordinatorError> {
        let ctx = TickContext {
            now,
            hour: now.with_timezone(&Local).hour(),
            dt_seconds: self.settings.tick_interval().as_secs_f64(),
        };

        let trips = match bounded(
            self.settings.io_timeout(),
            self.store.find_active_trips(&TripStatus::ACTIVE),
        )
        .await
        {
            Ok(trips) => {
                self.mark_persistence(true).await;
                trips
            }
            Err(e) => {
                self.mark_persistence(false).await;
                self.consecutive_failed_ticks.fetch_add(1, Ordering::AcqRel);
                return Err(e.into());
            }
        };

        let mut summary = TickSummary {
            trips_seen: trips.len(),
            ..TickSummary::default()
        };

        let mut simulators = self.simulators.lock().await;
        let mut rng = self.rng.lock().await;

        let mut released_routes: BTreeSet<RouteId> = BTreeSet::new();
        summary.retired = self
            .retire_inactive(&mut simulators, &trips, &mut released_routes)
            .await;

        let mut route_delays: BTreeMap<RouteId, Vec<f64>> = BTreeMap::new();
        for trip in &trips {
            match self.process_trip(&mut simulators, &mut rng, trip, ctx).await {
                Ok(TripOutcome::Skipped) => summary.skipped = summary.skipped.saturating_add(1),
                Ok(TripOutcome::Advanced { route_id, delay }) => {
                    summary.advanced = summary.advanced.saturating_add(1);
                    route_delays.entry(route_id).or_default().push(delay);
                    summary.notifications_created = summary
                        .notifications_created
                        .saturating_add(self.notify_if_delayed(trip, delay).await);
                }
                Ok(TripOutcome::Completed { route_id }) => {
                    summary.advanced = summary.advanced.saturating_add(1);
                    summary.completed = summary.completed.saturating_add(1);
                    route_delays.entry(route_id).or_default();
                    released_routes.insert(route_id);
                    self.dedup.release_trip(trip.id).await;
                }
                Err(e) => {
                    summary.failed = summary.failed.saturating_add(1);
                    warn!(trip_id = %trip.id, route_id = %trip.route_id, error = %e, "trip update failed");
                }
            }
        }

        self.evict_idle_routes(&simulators, &released_routes).await;
        self.active_simulators
            .store(simulators.len(), Ordering::Release);
        drop(rng);
        drop(simulators);

        for (route_id, delays) in route_delays {
            self.emit_route_status(route_id, &delays, now).await;
        }

        self.ticks_completed.fetch_add(1, Ordering::AcqRel);
        self.consecutive_failed_ticks.store(0, Ordering::Release);
        *self.last_tick_at.write().await = Some(now);
        Ok(summary)
    }

    async fn retire_inactive(
        &self,
        simulators: &mut BTreeMap<TripId, TripSimulator>,
        trips: &[Trip],
        released_routes: &mut BTreeSet<RouteId>,
    ) -> usize {
        let active: BTreeSet<TripId> = trips.iter().map(|t| t.id).collect();
        let stale: Vec<TripId> = simulators
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        for trip_id in &stale {
            if let Some(sim) = simulators.remove(trip_id) {
                released_routes.insert(sim.route_id());
            }
            self.dedup.release_trip(*trip_id).await;
            info!(trip_id = %trip_id, "trip left active set, simulator retired");
        }
        stale.len()
    }

    /// Drop cached geometry for routes that no longer have a live
    /// simulator, so the next trip on the route sees current stop data.
    async fn evict_idle_routes(
        &self,
        simulators: &BTreeMap<TripId, TripSimulator>,
        released_routes: &BTreeSet<RouteId>,
    ) {
        let in_use: BTreeSet<RouteId> = simulators.values().map(TripSimulator::route_id).collect();
        for route_id in released_routes.difference(&in_use) {
            if self.geometry.invalidate(*route_id).await {
                debug!(route_id = %route_id, "route idle, cached geometry dropped");
            }
        }
    }

    async fn process_trip(
        &self,
        simulators: &mut BTreeMap<TripId, TripSimulator>,
        rng: &mut SmallRng,
        trip: &Trip,
        ctx: TickContext,
    ) -> Result<TripOutcome, TripError> {
        let sim = match simulators.entry(trip.id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match self.build_simulator(trip).await? {
                Some(sim) => entry.insert(sim),
                None => return Ok(TripOutcome::Skipped),
            },
        };

        let mut report = sim.advance(ctx.dt_seconds, ctx.now)?;
        let mut completed = false;
        if report.reached_end_of_segment {
            match sim.on_reach_end_of_segment(rng, ctx.hour)? {
                SegmentTransition::Completed => completed = true,
                SegmentTransition::Advanced { .. } => report = sim.advance(0.0, ctx.now)?,
                SegmentTransition::InTransit => {}
            }
        }

        let delay_minutes = if completed {
            sim.accumulated_delay_minutes()
        } else {
            self.estimate_delay(sim, rng, ctx).await
        };

        let patch = TripPatch {
            status: Some(if completed {
                TripStatus::Completed
            } else {
                TripStatus::InProgress
            }),
            current_position: Some(report.position.clone()),
            delay_minutes: Some(delay_minutes),
            next_stop_id: Some(report.position.next_stop_id),
            completed_stops: Some(sim.completed_stops().to_vec()),
        };
        bounded(self.settings.io_timeout(), self.store.update_trip(trip.id, patch))
            .await
            .map_err(TripError::Persist)?;

        let update = TripUpdate {
            trip_id: trip.id,
            route_id: trip.route_id,
            current_stop_id: sim.current_stop_id(),
            next_stop_id: if completed {
                None
            } else {
                Some(report.position.next_stop_id)
            },
            current_location: Some(LatLng::from(report.position.location)),
            speed: Some(if completed { 0.0 } else { report.speed_kmh }),
            heading: Some(report.heading_deg),
            delay_minutes,
            status: broadcast_status(
                completed,
                delay_minutes,
                self.settings.delay_threshold_minutes,
            ),
            last_updated: ctx.now,
        };
        self.sink.emit_trip_update(update).await;

        if completed {
            simulators.remove(&trip.id);
            info!(
                trip_id = %trip.id,
                route_id = %trip.route_id,
                delay_minutes,
                "trip completed"
            );
            return Ok(TripOutcome::Completed {
                route_id: trip.route_id,
            });
        }
        Ok(TripOutcome::Advanced {
            route_id: trip.route_id,
            delay: delay_minutes,
        })
    }

    /// Build a simulator for a trip seen for the first time, or `None` if
    /// its route has no usable geometry.
    async fn build_simulator(&self, trip: &Trip) -> Result<Option<TripSimulator>, TripError> {
        let resolved = tokio::time::timeout(
            self.settings.io_timeout(),
            self.geometry.resolve(trip.route_id),
        )
        .await
        .unwrap_or_else(|_elapsed| {
            Err(ResolveError::Store(StoreError::Timeout {
                timeout_ms: self.settings.io_timeout_ms,
            }))
        });

        let segments = match resolved {
            Ok(segments) => segments,
            Err(ResolveError::Geometry(e)) => {
                warn!(trip_id = %trip.id, error = %e, "skipping trip");
                return Ok(None);
            }
            Err(ResolveError::Store(e)) => return Err(TripError::Geometry(e)),
        };

        let config = SimulatorConfig {
            base_speed_kmh: self.settings.base_speed_kmh,
            default_eta_minutes: self.settings.default_eta_minutes,
        };
        let sim = if trip.status == TripStatus::InProgress {
            TripSimulator::resume(trip, segments, config)?
        } else {
            match TripSimulator::new(trip.id, trip.route_id, segments, config) {
                Ok(sim) => sim,
                Err(e) => {
                    warn!(trip_id = %trip.id, error = %e, "skipping trip");
                    return Ok(None);
                }
            }
        };
        info!(
            trip_id = %trip.id,
            route_id = %trip.route_id,
            resumed = trip.status == TripStatus::InProgress,
            "simulator created"
        );
        Ok(Some(sim))
    }

    async fn estimate_delay(
        &self,
        sim: &TripSimulator,
        rng: &mut SmallRng,
        ctx: TickContext,
    ) -> f64 {
        let fallback = sim.accumulated_delay_minutes();
        let request = PredictionRequest {
            route_id: sim.route_id(),
            trip_id: sim.trip_id(),
            current_time: ctx.now,
            traffic_level: delay::traffic_level(rng, ctx.hour),
            passenger_load: delay::passenger_load(rng),
        };
        let result = tokio::time::timeout(
            self.settings.io_timeout(),
            self.estimator.predict_delay(&request),
        )
        .await
        .unwrap_or_else(|_elapsed| {
            Err(EstimatorError::Timeout {
                timeout_ms: self.settings.io_timeout_ms,
            })
        });

        match result {
            Ok(prediction) if prediction.confidence >= self.min_confidence => {
                prediction.delay_minutes
            }
            Ok(prediction) => {
                debug!(
                    trip_id = %sim.trip_id(),
                    confidence = prediction.confidence,
                    "low-confidence prediction ignored"
                );
                fallback
            }
            Err(EstimatorError::Unavailable) => fallback,
            Err(e) => {
                warn!(trip_id = %sim.trip_id(), error = %e, "predictor failed, using simulated delay");
                fallback
            }
        }
    }

    /// Create delay notifications for the route's subscribers. Returns how
    /// many were created.
    async fn notify_if_delayed(&self, trip: &Trip, delay_minutes: f64) -> usize {
        if delay_minutes <= self.settings.delay_threshold_minutes {
            return 0;
        }
        let users = match bounded(
            self.settings.io_timeout(),
            self.store.find_route_subscribers(trip.route_id),
        )
        .await
        {
            Ok(users) => users,
            Err(e) => {
                warn!(trip_id = %trip.id, error = %e, "subscriber lookup failed");
                return 0;
            }
        };

        let mut created: usize = 0;
        for user_id in users {
            let notification = delay_notification(
                user_id,
                trip,
                delay_minutes,
                self.settings.high_priority_delay_minutes,
            );
            match self.dedup.create_if_absent(notification).await {
                Ok(DedupOutcome::Created(_)) => created = created.saturating_add(1),
                Ok(DedupOutcome::Suppressed) => {}
                Err(e) => {
                    warn!(trip_id = %trip.id, user_id = %user_id, error = %e, "delay notification failed");
                }
            }
        }
        created
    }

    async fn emit_route_status(&self, route_id: RouteId, delays: &[f64], now: DateTime<Utc>) {
        let average = if delays.is_empty() {
            0.0
        } else {
            delays.iter().sum::<f64>() / delays.len() as f64
        };
        let status = if average > self.settings.delay_threshold_minutes {
            RouteServiceStatus::Disrupted
        } else {
            RouteServiceStatus::Active
        };
        self.sink
            .emit_route_status(RouteStatusUpdate {
                route_id,
                status,
                active_trips: u32::try_from(delays.len()).unwrap_or(u32::MAX),
                average_delay_minutes: average,
                last_updated: now,
            })
            .await;
    }

    async fn mark_persistence(&self, reachable: bool) {
        let was = self.persistence_reachable.swap(reachable, Ordering::AcqRel);
        if was == reachable {
            return;
        }
        let (message, severity) = if reachable {
            ("Live tracking restored", AlertSeverity::Info)
        } else {
            ("Live tracking temporarily unavailable", AlertSeverity::Warning)
        };
        if reachable {
            info!("persistence reachable again");
        } else {
            error!("persistence unreachable");
        }
        self.sink
            .emit_system_alert(message.to_owned(), severity)
            .await;
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Periodically purge old notifications until a stop is requested.
    pub async fn run_retention(&self) {
        let period = Duration::from_secs(self.retention.retention_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.stopped() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.purge_notifications(Utc::now()).await {
                warn!(error = %e, "notification purge failed");
            }
        }
        debug!("notification retention stopped");
    }

    /// Delete notifications older than the retention window, measured from
    /// `now`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the purge fails.
    pub async fn purge_notifications(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let window = TimeDelta::days(i64::from(self.retention.retention_days));
        let cutoff = now.checked_sub_signed(window).unwrap_or(now);
        let removed = bounded(
            self.settings.io_timeout(),
            self.store.purge_notifications(cutoff),
        )
        .await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "purged old notifications");
        }
        Ok(removed)
    }
}

/// Status shown to riders for a trip update.
///
/// The stored status stays `in_progress` while the vehicle moves; riders
/// see `delayed` once the delay reaches the threshold and `completed` on
/// the final update.
pub fn broadcast_status(completed: bool, delay_minutes: f64, threshold_minutes: f64) -> TripStatus {
    if completed {
        TripStatus::Completed
    } else if delay_minutes >= threshold_minutes {
        TripStatus::Delayed
    } else {
        TripStatus::InProgress
    }
}

/// The delay notification sent to one subscriber of a trip's route.
pub fn delay_notification(
    user_id: UserId,
    trip: &Trip,
    delay_minutes: f64,
    high_priority_minutes: f64,
) -> NewNotification {
    NewNotification {
        user_id,
        trip_id: Some(trip.id),
        route_id: Some(trip.route_id),
        notification_type: NotificationType::Delay,
        title: String::from("Bus Delay Alert"),
        message: format!(
            "Your bus on route {} is delayed by {delay_minutes:.0} minutes",
            trip.route_id
        ),
        priority: if delay_minutes > high_priority_minutes {
            NotificationPriority::High
        } else {
            NotificationPriority::Normal
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::predictor::Prediction;
    use crate::sink::RecordingSink;
    use transit_types::{Coordinate, RouteRecord, Stop, StopId};

    struct Fixture {
        store: Arc<InMemoryStore>,
        sink: Arc<RecordingSink>,
        coordinator: Arc<SimulationCoordinator>,
    }

    fn config() -> TransitConfig {
        let mut config = TransitConfig::default();
        // One minute per tick makes progress easy to reason about.
        config.simulation.tick_interval_ms = 60_000;
        config
    }

    fn fixture_with(config: &TransitConfig, estimator: DelayEstimator) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let coordinator = Arc::new(SimulationCoordinator::new(
            config,
            store.clone(),
            estimator,
            sink.clone(),
        ));
        Fixture {
            store,
            sink,
            coordinator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(&config(), DelayEstimator::Null)
    }

    /// Stops roughly 2 km then 3 km apart along a meridian.
    async fn seed_route(store: &InMemoryStore) -> RouteRecord {
        let km_per_degree = 111.194_926_6;
        let lats = [0.0, 2.0 / km_per_degree, 5.0 / km_per_degree];
        let mut ids = Vec::new();
        for (i, lat) in lats.iter().enumerate() {
            let stop = Stop {
                id: StopId::new(),
                name: format!("Stop {i}"),
                location: Coordinate::new(*lat, 0.0),
            };
            ids.push(stop.id);
            store.insert_stop(stop).await;
        }
        let route = RouteRecord {
            id: RouteId::new(),
            name: String::from("15"),
            stops: ids,
        };
        store.insert_route(route.clone()).await;
        route
    }

    fn scheduled_trip(route_id: RouteId) -> Trip {
        Trip {
            id: TripId::new(),
            route_id,
            status: TripStatus::Scheduled,
            start_time: Utc::now(),
            current_position: None,
            delay_minutes: 0.0,
            next_stop_id: None,
            completed_stops: Vec::new(),
        }
    }

    #[tokio::test]
    async fn first_tick_starts_trip_and_emits_update() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let trip = scheduled_trip(route.id);
        f.store.insert_trip(trip.clone()).await;

        let summary = f.coordinator.tick().await.unwrap();
        assert_eq!(summary.trips_seen, 1);
        assert_eq!(summary.advanced, 1);

        let stored = f.store.trip(trip.id).await.unwrap();
        assert_eq!(stored.status, TripStatus::InProgress);
        assert_eq!(stored.next_stop_id, Some(route.stops[1]));
        let position = stored.current_position.unwrap();
        // 30 km/h for one minute on a 2 km segment.
        assert!((position.distance_to_next_stop_km - 1.5).abs() < 1e-3);

        let updates = f.sink.trip_updates().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].trip_id, trip.id);
        assert_eq!(updates[0].status, TripStatus::InProgress);
        assert!(updates[0].heading.unwrap().abs() < 1e-6);
        assert_eq!(f.coordinator.stats().await.active_simulators, 1);
    }

    #[tokio::test]
    async fn trip_runs_to_completion() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let trip = scheduled_trip(route.id);
        f.store.insert_trip(trip.clone()).await;

        let mut ticks = 0_u32;
        loop {
            let summary = f.coordinator.tick().await.unwrap();
            ticks = ticks.saturating_add(1);
            if summary.completed == 1 || ticks > 40 {
                break;
            }
        }

        let stored = f.store.trip(trip.id).await.unwrap();
        assert_eq!(stored.status, TripStatus::Completed);
        assert_eq!(stored.completed_stops, route.stops[1..].to_vec());

        let last = f.sink.trip_updates().await.pop().unwrap();
        assert_eq!(last.status, TripStatus::Completed);
        assert_eq!(last.next_stop_id, None);
        assert_eq!(f.coordinator.stats().await.active_simulators, 0);

        // Completed trips are no longer selected.
        let after = f.coordinator.tick().await.unwrap();
        assert_eq!(after.trips_seen, 0);
    }

    #[tokio::test]
    async fn unresolvable_geometry_is_skipped_without_writes() {
        let f = fixture();
        let lonely = Stop {
            id: StopId::new(),
            name: String::from("Only stop"),
            location: Coordinate::new(0.0, 0.0),
        };
        f.store.insert_stop(lonely.clone()).await;
        let route = RouteRecord {
            id: RouteId::new(),
            name: String::from("X"),
            stops: vec![lonely.id],
        };
        f.store.insert_route(route.clone()).await;
        let trip = scheduled_trip(route.id);
        f.store.insert_trip(trip.clone()).await;

        for _ in 0..3 {
            let summary = f.coordinator.tick().await.unwrap();
            assert_eq!(summary.skipped, 1);
            assert_eq!(summary.failed, 0);
        }
        assert_eq!(f.store.write_count(trip.id).await, 0);
        assert!(f.sink.trip_updates().await.is_empty());

        // Once geometry becomes resolvable the trip starts moving.
        let second = Stop {
            id: StopId::new(),
            name: String::from("New stop"),
            location: Coordinate::new(0.01, 0.0),
        };
        f.store.insert_stop(second.clone()).await;
        f.store
            .insert_route(RouteRecord {
                stops: vec![lonely.id, second.id],
                ..route
            })
            .await;
        let summary = f.coordinator.tick().await.unwrap();
        assert_eq!(summary.advanced, 1);
        assert_eq!(f.store.write_count(trip.id).await, 1);
    }

    #[tokio::test]
    async fn foreign_served_stop_restarts_trip_from_first_segment() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let good = scheduled_trip(route.id);
        let mut resumed = scheduled_trip(route.id);
        resumed.status = TripStatus::InProgress;
        resumed.delay_minutes = 2.0;
        resumed.completed_stops = vec![StopId::new()];
        f.store.insert_trip(good.clone()).await;
        f.store.insert_trip(resumed.clone()).await;

        let mut last_lat = f64::MIN;
        for _ in 0..3 {
            let summary = f.coordinator.tick().await.unwrap();
            assert_eq!(summary.failed, 0);
            assert_eq!(summary.advanced, 2);

            let stored = f.store.trip(resumed.id).await.unwrap();
            let position = stored.current_position.unwrap();
            assert_eq!(position.next_stop_id, route.stops[1]);
            assert!(position.location.latitude > last_lat);
            last_lat = position.location.latitude;
            assert!(stored.completed_stops.is_empty());
            assert!(stored.delay_minutes >= 2.0);
        }
        assert_eq!(f.store.write_count(good.id).await, 3);
        assert_eq!(f.store.write_count(resumed.id).await, 3);
    }

    #[tokio::test]
    async fn store_outage_fails_tick_and_raises_alert() {
        let f = fixture();
        f.store.set_available(false);
        assert!(f.coordinator.tick().await.is_err());
        assert!(f.coordinator.tick().await.is_err());

        let stats = f.coordinator.stats().await;
        assert!(!stats.persistence_reachable);
        assert_eq!(stats.consecutive_failed_ticks, 2);
        assert_eq!(stats.ticks_completed, 0);

        f.store.set_available(true);
        f.coordinator.tick().await.unwrap();
        let stats = f.coordinator.stats().await;
        assert!(stats.persistence_reachable);
        assert_eq!(stats.consecutive_failed_ticks, 0);

        let alerts: Vec<AlertSeverity> = f
            .sink
            .events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                crate::sink::SinkEvent::SystemAlert(_, severity) => Some(severity),
                _ => None,
            })
            .collect();
        assert_eq!(alerts, vec![AlertSeverity::Warning, AlertSeverity::Info]);
    }

    #[tokio::test]
    async fn confident_prediction_over_threshold_notifies_once() {
        let estimator = DelayEstimator::Fixed(Prediction {
            delay_minutes: 8.0,
            confidence: 0.9,
        });
        let f = fixture_with(&config(), estimator);
        let route = seed_route(&f.store).await;
        let trip = scheduled_trip(route.id);
        let rider = UserId::new();
        f.store.insert_trip(trip.clone()).await;
        f.store.subscribe_user(route.id, rider).await;

        for _ in 0..3 {
            f.coordinator.tick().await.unwrap();
        }

        let stored = f.store.notifications().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, rider);
        assert_eq!(stored[0].title, "Bus Delay Alert");
        assert_eq!(stored[0].priority, NotificationPriority::Normal);
        assert_eq!(f.sink.notifications().await.len(), 1);

        let updates = f.sink.trip_updates().await;
        assert!(updates.iter().all(|u| u.status == TripStatus::Delayed));
        assert!(updates.iter().all(|u| (u.delay_minutes - 8.0).abs() < 1e-9));

        let statuses = f.sink.route_statuses().await;
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0].status, RouteServiceStatus::Disrupted);
        assert_eq!(statuses[0].active_trips, 1);
    }

    #[tokio::test]
    async fn delay_at_threshold_is_flagged_but_not_notified() {
        let config = config();
        let estimator = DelayEstimator::Fixed(Prediction {
            delay_minutes: config.simulation.delay_threshold_minutes,
            confidence: 0.9,
        });
        let f = fixture_with(&config, estimator);
        let route = seed_route(&f.store).await;
        f.store.insert_trip(scheduled_trip(route.id)).await;
        f.store.subscribe_user(route.id, UserId::new()).await;

        let summary = f.coordinator.tick().await.unwrap();
        assert_eq!(summary.notifications_created, 0);
        assert!(f.store.notifications().await.is_empty());
        assert!(f.sink.notifications().await.is_empty());

        let update = f.sink.trip_updates().await.pop().unwrap();
        assert_eq!(update.status, TripStatus::Delayed);
    }

    #[tokio::test]
    async fn completed_trip_is_not_counted_as_active_on_route() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let mut finishing = scheduled_trip(route.id);
        finishing.status = TripStatus::InProgress;
        finishing.completed_stops = vec![route.stops[1], route.stops[2]];
        f.store.insert_trip(finishing.clone()).await;
        f.store.insert_trip(scheduled_trip(route.id)).await;

        let summary = f.coordinator.tick().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.advanced, 2);

        let statuses = f.sink.route_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].route_id, route.id);
        assert_eq!(statuses[0].active_trips, 1);
    }

    #[tokio::test]
    async fn idle_route_geometry_is_evicted() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let mut finishing = scheduled_trip(route.id);
        finishing.status = TripStatus::InProgress;
        finishing.completed_stops = vec![route.stops[1], route.stops[2]];
        let running = scheduled_trip(route.id);
        f.store.insert_trip(finishing).await;
        f.store.insert_trip(running.clone()).await;

        // One trip completes, the other keeps the route in use.
        f.coordinator.tick().await.unwrap();
        assert_eq!(f.coordinator.geometry.cached_routes().await, 1);

        f.store
            .insert_trip(Trip {
                status: TripStatus::Cancelled,
                ..f.store.trip(running.id).await.unwrap()
            })
            .await;
        f.coordinator.tick().await.unwrap();
        assert_eq!(f.coordinator.geometry.cached_routes().await, 0);
    }

    #[tokio::test]
    async fn route_with_only_completed_trips_reports_none_active() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let mut finishing = scheduled_trip(route.id);
        finishing.status = TripStatus::InProgress;
        finishing.delay_minutes = 9.0;
        finishing.completed_stops = vec![route.stops[1], route.stops[2]];
        f.store.insert_trip(finishing).await;

        f.coordinator.tick().await.unwrap();
        let statuses = f.sink.route_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].active_trips, 0);
        assert_eq!(statuses[0].status, RouteServiceStatus::Active);
        assert!(statuses[0].average_delay_minutes.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn low_confidence_prediction_is_ignored() {
        let estimator = DelayEstimator::Fixed(Prediction {
            delay_minutes: 50.0,
            confidence: 0.2,
        });
        let f = fixture_with(&config(), estimator);
        let route = seed_route(&f.store).await;
        f.store.insert_trip(scheduled_trip(route.id)).await;

        f.coordinator.tick().await.unwrap();
        let update = f.sink.trip_updates().await.pop().unwrap();
        // First tick has no segment transition yet, so no simulated delay.
        assert!(update.delay_minutes.abs() < f64::EPSILON);
        assert!(f.store.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_trip_is_retired() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let trip = scheduled_trip(route.id);
        f.store.insert_trip(trip.clone()).await;
        f.coordinator.tick().await.unwrap();

        f.store
            .insert_trip(Trip {
                status: TripStatus::Cancelled,
                ..f.store.trip(trip.id).await.unwrap()
            })
            .await;
        let summary = f.coordinator.tick().await.unwrap();
        assert_eq!(summary.retired, 1);
        assert_eq!(f.coordinator.stats().await.active_simulators, 0);
    }

    #[tokio::test]
    async fn resumed_trip_continues_after_last_stop() {
        let f = fixture();
        let route = seed_route(&f.store).await;
        let mut trip = scheduled_trip(route.id);
        trip.status = TripStatus::InProgress;
        trip.completed_stops = vec![route.stops[1]];
        f.store.insert_trip(trip.clone()).await;

        f.coordinator.tick().await.unwrap();
        let stored = f.store.trip(trip.id).await.unwrap();
        assert_eq!(stored.next_stop_id, Some(route.stops[2]));
    }

    #[tokio::test]
    async fn purge_uses_retention_window() {
        let f = fixture();
        f.store
            .insert_notification(delay_notification(
                UserId::new(),
                &scheduled_trip(RouteId::new()),
                6.0,
                15.0,
            ))
            .await
            .unwrap();
        assert_eq!(f.coordinator.purge_notifications(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + TimeDelta::days(31);
        assert_eq!(f.coordinator.purge_notifications(later).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_ticks_until_stopped() {
        let mut config = TransitConfig::default();
        config.simulation.tick_interval_ms = 1000;
        let f = fixture_with(&config, DelayEstimator::Null);

        let runner = Arc::clone(&f.coordinator);
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(f.coordinator.stats().await.running);

        f.coordinator.shutdown(handle).await;
        let stats = f.coordinator.stats().await;
        assert!(!stats.running);
        assert!(stats.ticks_completed >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_ticks_back_off() {
        let mut config = TransitConfig::default();
        config.simulation.tick_interval_ms = 1000;
        config.simulation.error_backoff_ms = 5000;
        let f = fixture_with(&config, DelayEstimator::Null);
        f.store.set_available(false);

        let runner = Arc::clone(&f.coordinator);
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(5500)).await;
        // First tick at t=0 fails, backoff until t=5s, second tick fails.
        assert_eq!(f.coordinator.stats().await.consecutive_failed_ticks, 2);

        f.coordinator.shutdown(handle).await;
        assert!(!f.coordinator.stats().await.running);
    }

    #[test]
    fn notification_content() {
        let trip = scheduled_trip(RouteId::new());
        let normal = delay_notification(UserId::new(), &trip, 7.4, 15.0);
        assert_eq!(
            normal.message,
            format!("Your bus on route {} is delayed by 7 minutes", trip.route_id)
        );
        assert_eq!(normal.priority, NotificationPriority::Normal);
        let high = delay_notification(UserId::new(), &trip, 16.0, 15.0);
        assert_eq!(high.priority, NotificationPriority::High);
    }

    #[test]
    fn rider_facing_status() {
        assert_eq!(broadcast_status(false, 2.0, 5.0), TripStatus::InProgress);
        assert_eq!(broadcast_status(false, 5.0, 5.0), TripStatus::Delayed);
        assert_eq!(broadcast_status(true, 9.0, 5.0), TripStatus::Completed);
    }
}
