//! Shared application state for the hub's HTTP server.
//!
//! [`AppState`] is built once by the engine, wrapped in an [`Arc`] and
//! injected via Axum's `State` extractor. It holds the message router (and
//! through it the [`ConnectionHub`]) plus an optional handle on the
//! simulation coordinator for the stats and health endpoints.

use std::sync::Arc;

use transit_core::SimulationCoordinator;

use crate::handler::MessageRouter;
use crate::hub::ConnectionHub;

/// Shared state for the Axum application.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Routes client frames to the hub.
    pub router: MessageRouter,
    /// The simulation driving the events, when running in the engine.
    pub coordinator: Option<Arc<SimulationCoordinator>>,
}

impl AppState {
    /// State with a hub and no coordinator.
    pub const fn new(hub: Arc<ConnectionHub>) -> Self {
        Self {
            router: MessageRouter::new(hub),
            coordinator: None,
        }
    }

    /// State with a hub and the coordinator feeding it.
    pub const fn with_coordinator(
        hub: Arc<ConnectionHub>,
        coordinator: Arc<SimulationCoordinator>,
    ) -> Self {
        Self {
            router: MessageRouter::new(hub),
            coordinator: Some(coordinator),
        }
    }

    /// The connection hub.
    pub const fn hub(&self) -> &Arc<ConnectionHub> {
        self.router.hub()
    }
}
