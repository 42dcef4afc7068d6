//! Route geometry resolution with caching.
//!
//! [`RouteGeometry::resolve`] looks a route up in the store, resolves each of
//! its stops to a coordinate and builds the ordered segment list. Successful
//! results are cached by route id for the life of the process; failures are
//! not cached, so a route whose stops are fixed later becomes resolvable on
//! the next tick.

use std::sync::Arc;

use tokio::sync::RwLock;
use transit_sim::{GeometryError, RouteSegment, SegmentCache, build_segments};
use transit_types::RouteId;

use crate::store::{StoreError, TripStore};

/// Why a route's segments could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The route exists in a form that cannot be simulated.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The store failed while looking the route up.
    #[error("route lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Resolves and caches route segments.
pub struct RouteGeometry {
    store: Arc<dyn TripStore>,
    base_speed_kmh: f64,
    cache: RwLock<SegmentCache>,
}

impl std::fmt::Debug for RouteGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteGeometry")
            .field("base_speed_kmh", &self.base_speed_kmh)
            .finish_non_exhaustive()
    }
}

impl RouteGeometry {
    /// Create a resolver over `store`. `base_speed_kmh` feeds the expected
    /// segment durations.
    pub fn new(store: Arc<dyn TripStore>, base_speed_kmh: f64) -> Self {
        Self {
            store,
            base_speed_kmh,
            cache: RwLock::new(SegmentCache::new()),
        }
    }

    /// Ordered segments of `route_id`.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Geometry`] if the route is missing, any stop lookup
    /// misses, or fewer than two stops resolve; [`ResolveError::Store`] if
    /// the store call itself fails.
    pub async fn resolve(&self, route_id: RouteId) -> Result<Arc<[RouteSegment]>, ResolveError> {
        if let Some(hit) = self.cache.read().await.get(route_id) {
            return Ok(hit);
        }

        let route = self
            .store
            .find_route(route_id)
            .await?
            .ok_or_else(|| GeometryError::unavailable(route_id, "route not found"))?;

        let mut stops = Vec::with_capacity(route.stops.len());
        for stop_id in &route.stops {
            let stop = self.store.find_stop(*stop_id).await?.ok_or_else(|| {
                GeometryError::unavailable(route_id, format!("stop {stop_id} not found"))
            })?;
            stops.push(stop);
        }

        let segments = build_segments(route_id, &stops, self.base_speed_kmh)?;
        tracing::debug!(
            route_id = %route_id,
            segments = segments.len(),
            "resolved route geometry"
        );
        Ok(self.cache.write().await.insert(route_id, segments))
    }

    /// Drop a cached route so the next call rebuilds it.
    pub async fn invalidate(&self, route_id: RouteId) -> bool {
        self.cache.write().await.invalidate(route_id)
    }

    /// Number of cached routes.
    pub async fn cached_routes(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use transit_types::{Coordinate, RouteRecord, Stop, StopId};

    async fn seeded(stop_count: usize) -> (Arc<InMemoryStore>, RouteRecord) {
        let store = Arc::new(InMemoryStore::new());
        let mut ids = Vec::new();
        for i in 0..stop_count {
            let stop = Stop {
                id: StopId::new(),
                name: format!("Stop {i}"),
                location: Coordinate::new(0.01 * i as f64, 0.0),
            };
            ids.push(stop.id);
            store.insert_stop(stop).await;
        }
        let route = RouteRecord {
            id: RouteId::new(),
            name: String::from("7"),
            stops: ids,
        };
        store.insert_route(route.clone()).await;
        (store, route)
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let (store, route) = seeded(3).await;
        let geometry = RouteGeometry::new(store.clone(), 30.0);

        let first = geometry.resolve(route.id).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].start_stop_id, route.stops[0]);
        assert_eq!(geometry.cached_routes().await, 1);

        // Served from cache even when the store is down.
        store.set_available(false);
        let second = geometry.resolve(route.id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn single_stop_route_is_unavailable() {
        let (store, route) = seeded(1).await;
        let geometry = RouteGeometry::new(store, 30.0);
        let err = geometry.resolve(route.id).await.unwrap_err();
        assert!(matches!(err, ResolveError::Geometry(_)));
        assert_eq!(geometry.cached_routes().await, 0);
    }

    #[tokio::test]
    async fn missing_stop_is_unavailable_until_fixed() {
        let (store, mut route) = seeded(2).await;
        let ghost = StopId::new();
        route.stops.push(ghost);
        store.insert_route(route.clone()).await;
        let geometry = RouteGeometry::new(store.clone(), 30.0);

        assert!(matches!(
            geometry.resolve(route.id).await,
            Err(ResolveError::Geometry(_))
        ));

        store
            .insert_stop(Stop {
                id: ghost,
                name: String::from("Late addition"),
                location: Coordinate::new(0.05, 0.0),
            })
            .await;
        assert_eq!(geometry.resolve(route.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_route_and_store_failure() {
        let store = Arc::new(InMemoryStore::new());
        let geometry = RouteGeometry::new(store.clone(), 30.0);
        assert!(matches!(
            geometry.resolve(RouteId::new()).await,
            Err(ResolveError::Geometry(_))
        ));
        store.set_available(false);
        assert!(matches!(
            geometry.resolve(RouteId::new()).await,
            Err(ResolveError::Store(_))
        ));
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let (store, route) = seeded(2).await;
        let geometry = RouteGeometry::new(store, 30.0);
        let first = geometry.resolve(route.id).await.unwrap();
        assert!(geometry.invalidate(route.id).await);
        let second = geometry.resolve(route.id).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }
}
