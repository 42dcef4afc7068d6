//! Per-trip motion state machine.
//!
//! A [`TripSimulator`] walks a vehicle along the segments of its route. Each
//! call to [`TripSimulator::advance`] moves it `speed * dt` kilometres along
//! the current segment. Once the segment is fully traversed the caller
//! invokes [`TripSimulator::on_reach_end_of_segment`], which records the
//! stop, samples the delay model and either moves on to the next segment or
//! reports that the trip is complete.
//!
//! ```text
//!   advance(dt) ──► progress < 1 ──► advance(dt) ...
//!        │
//!        └──► progress = 1 ──► on_reach_end_of_segment()
//!                                 ├── Advanced  (progress = 0, next segment)
//!                                 └── Completed (last stop recorded)
//! ```
//!
//! The simulator is synchronous and owns no I/O. A failed step leaves the
//! state untouched so the next tick retries from the last valid position.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use transit_types::{RouteId, StopId, Trip, TripId, TripPosition};

use crate::delay::{self, SegmentDelay};
use crate::error::{GeometryError, SimulationStepError};
use crate::geometry::RouteSegment;

/// Tunables shared by every simulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Cruising speed the delay model nudges around, in km/h.
    pub base_speed_kmh: f64,
    /// ETA used when the vehicle is stationary, in minutes.
    pub default_eta_minutes: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_speed_kmh: 30.0,
            default_eta_minutes: 30.0,
        }
    }
}

/// In-memory state of one simulated trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorState {
    /// Trip being simulated.
    pub trip_id: TripId,
    /// Index into the route's segment list.
    pub current_segment_index: usize,
    /// Fraction of the current segment traversed, in `[0, 1]`.
    pub progress: f64,
    /// Current speed in km/h.
    pub speed_kmh: f64,
    /// Delay accumulated at segment transitions, in minutes.
    pub accumulated_delay_minutes: f64,
    /// Stops already served, in order, without repeats.
    pub completed_stops: Vec<StopId>,
}

/// Result of one [`TripSimulator::advance`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Position snapshot to persist.
    pub position: TripPosition,
    /// Last stop served, if any.
    pub current_stop_id: Option<StopId>,
    /// Speed used for this step, in km/h.
    pub speed_kmh: f64,
    /// Bearing of the current segment in degrees.
    pub heading_deg: f64,
    /// Progress after the step.
    pub progress: f64,
    /// Whether the segment end was reached on this step.
    pub reached_end_of_segment: bool,
}

/// What happened at the end of a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentTransition {
    /// The current segment has not been fully traversed yet.
    InTransit,
    /// Moved on to the next segment after sampling this delay.
    Advanced {
        /// Delay sampled for the transition.
        delay: SegmentDelay,
    },
    /// The final stop was reached.
    Completed,
}

/// Motion state machine for a single trip.
#[derive(Debug, Clone)]
pub struct TripSimulator {
    route_id: RouteId,
    segments: Arc<[RouteSegment]>,
    config: SimulatorConfig,
    state: SimulatorState,
}

impl TripSimulator {
    /// Start a fresh simulation at the first stop of the route.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::GeometryUnavailable`] if `segments` is empty.
    pub fn new(
        trip_id: TripId,
        route_id: RouteId,
        segments: Arc<[RouteSegment]>,
        config: SimulatorConfig,
    ) -> Result<Self, GeometryError> {
        if segments.is_empty() {
            return Err(GeometryError::unavailable(route_id, "route has no segments"));
        }
        Ok(Self {
            route_id,
            segments,
            config,
            state: SimulatorState {
                trip_id,
                current_segment_index: 0,
                progress: 0.0,
                speed_kmh: config.base_speed_kmh,
                accumulated_delay_minutes: 0.0,
                completed_stops: Vec::new(),
            },
        })
    }

    /// Rebuild a simulator for a trip that was already running.
    ///
    /// The vehicle is placed at the start of the first segment leaving the
    /// last completed stop. A trip whose last completed stop is the final
    /// stop is placed at the end of the last segment so the next tick
    /// completes it. A last completed stop that is not on the route (the
    /// route was edited under a running trip) restarts the trip from the
    /// first segment with no served stops. The persisted delay seeds the
    /// accumulated delay either way.
    ///
    /// # Errors
    ///
    /// Wraps a geometry failure as [`SimulationStepError::SegmentOutOfRange`]
    /// when `segments` is empty.
    pub fn resume(
        trip: &Trip,
        segments: Arc<[RouteSegment]>,
        config: SimulatorConfig,
    ) -> Result<Self, SimulationStepError> {
        let mut sim = Self::new(trip.id, trip.route_id, segments, config).map_err(|_geometry| {
            SimulationStepError::SegmentOutOfRange {
                trip_id: trip.id,
                index: 0,
                len: 0,
            }
        })?;
        sim.state.accumulated_delay_minutes = if trip.delay_minutes.is_finite() {
            trip.delay_minutes.max(0.0)
        } else {
            0.0
        };
        sim.state.completed_stops = dedup_in_order(&trip.completed_stops);

        let Some(last) = sim.state.completed_stops.last().copied() else {
            return Ok(sim);
        };

        if let Some(index) = sim.segments.iter().position(|s| s.start_stop_id == last) {
            sim.state.current_segment_index = index;
        } else if sim.segments.last().is_some_and(|s| s.end_stop_id == last) {
            sim.state.current_segment_index = sim.segments.len().saturating_sub(1);
            sim.state.progress = 1.0;
        } else {
            tracing::warn!(
                trip_id = %trip.id,
                route_id = %trip.route_id,
                stop_id = %last,
                "last served stop is not on the route, restarting from the first segment"
            );
            sim.state.completed_stops.clear();
        }
        Ok(sim)
    }

    /// Move the vehicle along the current segment by `dt_seconds` of travel.
    ///
    /// Progress is clamped to 1.0. A zero-length segment is traversed in a
    /// single step.
    ///
    /// # Errors
    ///
    /// Rejects negative or non-finite steps and non-finite results; the
    /// state is left unchanged on error.
    pub fn advance(
        &mut self,
        dt_seconds: f64,
        now: DateTime<Utc>,
    ) -> Result<StepReport, SimulationStepError> {
        let trip_id = self.state.trip_id;
        if !dt_seconds.is_finite() || dt_seconds < 0.0 {
            return Err(SimulationStepError::InvalidTimeStep {
                trip_id,
                dt_seconds,
            });
        }
        let segment = self.current_segment()?;

        let moved_km = self.state.speed_kmh * dt_seconds / 3600.0;
        let progress = if segment.distance_km > 0.0 {
            (self.state.progress + moved_km / segment.distance_km).min(1.0)
        } else {
            1.0
        };
        if !progress.is_finite() {
            return Err(SimulationStepError::NonFinite {
                trip_id,
                quantity: "progress",
            });
        }

        let location = segment.position_at(progress);
        let remaining_km = (1.0 - progress) * segment.distance_km;
        let estimated_arrival = self.estimate_arrival(remaining_km, now);
        let heading_deg = segment.heading_deg();
        let next_stop_id = segment.end_stop_id;

        self.state.progress = progress;

        Ok(StepReport {
            position: TripPosition {
                location,
                next_stop_id,
                distance_to_next_stop_km: remaining_km,
                estimated_arrival,
                last_updated: now,
            },
            current_stop_id: self.current_stop_id(),
            speed_kmh: self.state.speed_kmh,
            heading_deg,
            progress,
            reached_end_of_segment: progress >= 1.0,
        })
    }

    /// Handle arrival at the end of the current segment.
    ///
    /// Appends the segment's end stop to `completed_stops` unless it is
    /// already the last entry, then either moves to the next segment with
    /// freshly sampled delay and speed, or reports completion. `hour` is the
    /// local hour of day used by the traffic model.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationStepError::SegmentOutOfRange`] if the state
    /// points past the route.
    pub fn on_reach_end_of_segment(
        &mut self,
        rng: &mut impl Rng,
        hour: u32,
    ) -> Result<SegmentTransition, SimulationStepError> {
        if self.state.progress < 1.0 {
            return Ok(SegmentTransition::InTransit);
        }
        let end_stop = self.current_segment()?.end_stop_id;
        if self.state.completed_stops.last() != Some(&end_stop) {
            self.state.completed_stops.push(end_stop);
        }

        let next_index = self.state.current_segment_index.saturating_add(1);
        if next_index >= self.segments.len() {
            return Ok(SegmentTransition::Completed);
        }

        let delay = delay::sample_segment_delay(rng, hour);
        let total = delay.total_minutes();
        self.state.current_segment_index = next_index;
        self.state.progress = 0.0;
        self.state.accumulated_delay_minutes += total;
        self.state.speed_kmh = delay::next_speed_kmh(rng, self.config.base_speed_kmh, total);

        tracing::debug!(
            trip_id = %self.state.trip_id,
            segment = next_index,
            delay_minutes = total,
            speed_kmh = self.state.speed_kmh,
            "advanced to next segment"
        );
        Ok(SegmentTransition::Advanced { delay })
    }

    /// Trip being simulated.
    pub const fn trip_id(&self) -> TripId {
        self.state.trip_id
    }

    /// Route the trip runs on.
    pub const fn route_id(&self) -> RouteId {
        self.route_id
    }

    /// Read-only view of the state.
    pub const fn state(&self) -> &SimulatorState {
        &self.state
    }

    /// Delay accumulated so far, in minutes.
    pub const fn accumulated_delay_minutes(&self) -> f64 {
        self.state.accumulated_delay_minutes
    }

    /// Stops served so far.
    pub fn completed_stops(&self) -> &[StopId] {
        &self.state.completed_stops
    }

    /// Last stop served, if any.
    pub fn current_stop_id(&self) -> Option<StopId> {
        self.state.completed_stops.last().copied()
    }

    /// Stop at the end of the current segment.
    pub fn next_stop_id(&self) -> Option<StopId> {
        self.segments
            .get(self.state.current_segment_index)
            .map(|s| s.end_stop_id)
    }

    /// Bearing of the current segment in degrees.
    pub fn heading_deg(&self) -> Option<f64> {
        self.segments
            .get(self.state.current_segment_index)
            .map(RouteSegment::heading_deg)
    }

    fn current_segment(&self) -> Result<&RouteSegment, SimulationStepError> {
        self.segments
            .get(self.state.current_segment_index)
            .ok_or(SimulationStepError::SegmentOutOfRange {
                trip_id: self.state.trip_id,
                index: self.state.current_segment_index,
                len: self.segments.len(),
            })
    }

    fn estimate_arrival(&self, remaining_km: f64, now: DateTime<Utc>) -> DateTime<Utc> {
        let minutes = if self.state.speed_kmh > 0.0 {
            remaining_km / self.state.speed_kmh * 60.0
        } else {
            self.config.default_eta_minutes
        };
        #[allow(clippy::cast_possible_truncation)]
        let millis = (minutes * 60_000.0).round() as i64;
        TimeDelta::try_milliseconds(millis)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now)
    }
}

fn dedup_in_order(stops: &[StopId]) -> Vec<StopId> {
    let mut out: Vec<StopId> = Vec::with_capacity(stops.len());
    for stop in stops {
        if !out.contains(stop) {
            out.push(*stop);
        }
    }
    out
}
