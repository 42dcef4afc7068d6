//! Error types for the `transit-sim` crate.
//!
//! Geometry failures skip a trip for the current tick; step failures leave
//! the simulator in its last valid state. Neither is fatal to the tick.

use transit_types::{RouteId, TripId};

/// A route's geometry cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// The route has fewer than two stops with known coordinates, or a stop
    /// lookup missed.
    #[error("geometry unavailable for route {route_id}: {reason}")]
    GeometryUnavailable {
        /// The route whose geometry was requested.
        route_id: RouteId,
        /// What was missing.
        reason: String,
    },
}

impl GeometryError {
    /// Shorthand for [`GeometryError::GeometryUnavailable`].
    pub fn unavailable(route_id: RouteId, reason: impl Into<String>) -> Self {
        Self::GeometryUnavailable {
            route_id,
            reason: reason.into(),
        }
    }
}

/// An arithmetic or state fault while advancing one trip.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationStepError {
    /// The time step is negative, NaN or infinite.
    #[error("trip {trip_id}: invalid time step {dt_seconds}s")]
    InvalidTimeStep {
        /// The trip being advanced.
        trip_id: TripId,
        /// The rejected step.
        dt_seconds: f64,
    },

    /// The simulator points past the last segment.
    #[error("trip {trip_id}: segment index {index} out of range ({len} segments)")]
    SegmentOutOfRange {
        /// The trip being advanced.
        trip_id: TripId,
        /// The bad index.
        index: usize,
        /// Number of segments on the route.
        len: usize,
    },

    /// A computed quantity is not finite.
    #[error("trip {trip_id}: non-finite {quantity}")]
    NonFinite {
        /// The trip being advanced.
        trip_id: TripId,
        /// Which quantity overflowed (e.g. `progress`).
        quantity: &'static str,
    },
}
