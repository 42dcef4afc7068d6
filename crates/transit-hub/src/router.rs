//! Axum router construction for the hub.
//!
//! Assembles the `WebSocket` endpoint and the REST endpoints into a single
//! [`Router`] with CORS and request tracing.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /ws` -- realtime session (`?token=` optional)
/// - `GET /health` -- dependency health
/// - `GET /api/stats` -- connection and simulation counters
/// - `GET /api/connections/{id}` -- one connection's subscriptions
///
/// CORS allows any origin; browser and mobile clients connect directly.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_connect))
        .route("/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/connections/{id}", get(handlers::connection_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
