//! Great-circle geometry for route segments.
//!
//! A route is an ordered list of stops; consecutive stops form a
//! [`RouteSegment`]. Distances use the haversine formula on a spherical
//! Earth, positions along a segment are linear interpolations of the
//! endpoint coordinates, and headings are the initial great-circle bearing.
//!
//! Segments are immutable once built. Caching them per route is the job of
//! the resolver that owns the persistence handle.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use transit_types::{Coordinate, RouteId, Stop, StopId};

use crate::error::GeometryError;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// The sub-path between two consecutive stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    /// Stop the segment starts at.
    pub start_stop_id: StopId,
    /// Stop the segment ends at.
    pub end_stop_id: StopId,
    /// Great-circle length of the segment.
    pub distance_km: f64,
    /// Unimpeded traversal time at the base speed.
    pub expected_duration_minutes: f64,
    /// Coordinate of the start stop.
    pub start_coord: Coordinate,
    /// Coordinate of the end stop.
    pub end_coord: Coordinate,
}

impl RouteSegment {
    /// Build a segment between two stops, computing its distance and the
    /// unimpeded duration at `base_speed_kmh`.
    pub fn between(start: &Stop, end: &Stop, base_speed_kmh: f64) -> Self {
        let distance_km = haversine_km(start.location, end.location);
        Self {
            start_stop_id: start.id,
            end_stop_id: end.id,
            distance_km,
            expected_duration_minutes: expected_duration_minutes(distance_km, base_speed_kmh),
            start_coord: start.location,
            end_coord: end.location,
        }
    }

    /// Position on this segment at `progress` (clamped to `[0, 1]`).
    pub fn position_at(&self, progress: f64) -> Coordinate {
        interpolate(self.start_coord, self.end_coord, progress)
    }

    /// Initial bearing of the segment in degrees.
    pub fn heading_deg(&self) -> f64 {
        initial_bearing_deg(self.start_coord, self.end_coord)
    }
}

/// Great-circle distance between two coordinates in kilometres.
///
/// Symmetric in its arguments and zero for identical points.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Linear interpolation between two coordinates.
///
/// `progress <= 0` returns `start` exactly and `progress >= 1` returns
/// `end` exactly, so a vehicle sits precisely on its stops at segment
/// boundaries.
pub fn interpolate(start: Coordinate, end: Coordinate, progress: f64) -> Coordinate {
    if progress <= 0.0 {
        return start;
    }
    if progress >= 1.0 {
        return end;
    }
    Coordinate {
        latitude: (end.latitude - start.latitude).mul_add(progress, start.latitude),
        longitude: (end.longitude - start.longitude).mul_add(progress, start.longitude),
    }
}

/// Initial great-circle bearing from `from` to `to`, in degrees `[0, 360)`.
pub fn initial_bearing_deg(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos().mul_add(lat2.sin(), -(lat1.sin() * lat2.cos() * dlon.cos()));

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Unimpeded traversal time in minutes, or zero if the speed is not positive.
pub fn expected_duration_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh > 0.0 {
        distance_km / speed_kmh * 60.0
    } else {
        0.0
    }
}

/// Build the ordered segments of a route from its resolved stops.
///
/// # Errors
///
/// Returns [`GeometryError::GeometryUnavailable`] if fewer than two stops
/// are given.
pub fn build_segments(
    route_id: RouteId,
    stops: &[Stop],
    base_speed_kmh: f64,
) -> Result<Vec<RouteSegment>, GeometryError> {
    if stops.len() < 2 {
        return Err(GeometryError::unavailable(
            route_id,
            format!("route has {} resolvable stops, need at least 2", stops.len()),
        ));
    }

    Ok(stops
        .windows(2)
        .filter_map(|pair| match pair {
            [start, end] => Some(RouteSegment::between(start, end, base_speed_kmh)),
            _ => None,
        })
        .collect())
}

/// Resolved segments keyed by route.
///
/// Entries never expire; [`SegmentCache::invalidate`] drops one explicitly.
#[derive(Debug, Default)]
pub struct SegmentCache {
    routes: HashMap<RouteId, Arc<[RouteSegment]>>,
}

impl SegmentCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached segments for `route_id`, if resolved before.
    pub fn get(&self, route_id: RouteId) -> Option<Arc<[RouteSegment]>> {
        self.routes.get(&route_id).cloned()
    }

    /// Store the segments of a route, returning the shared handle.
    pub fn insert(&mut self, route_id: RouteId, segments: Vec<RouteSegment>) -> Arc<[RouteSegment]> {
        let shared: Arc<[RouteSegment]> = Arc::from(segments);
        self.routes.insert(route_id, Arc::clone(&shared));
        shared
    }

    /// Forget a route so the next lookup rebuilds it.
    pub fn invalidate(&mut self, route_id: RouteId) -> bool {
        self.routes.remove(&route_id).is_some()
    }

    /// Number of cached routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
