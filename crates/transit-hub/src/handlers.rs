//! REST endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | 200 while persistence is reachable, 503 otherwise |
//! | `GET` | `/api/stats` | Connection and simulation counters |
//! | `GET` | `/api/connections/{id}` | Subscription state of one connection |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use transit_core::CoordinatorStats;
use transit_types::{ConnectionId, StatusReport};

use crate::error::ApiError;
use crate::hub::HubStats;
use crate::state::AppState;

/// Body of `GET /api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Connection counters.
    pub connections: HubStats,
    /// Coordinator counters, when a coordinator is attached.
    pub simulation: Option<CoordinatorStats>,
}

/// Liveness and dependency health.
///
/// Only total unavailability of persistence degrades the service; per-trip
/// and per-connection failures never show up here.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connections = state.hub().connection_count().await;
    let reachable = state
        .coordinator
        .as_ref()
        .is_none_or(|c| c.persistence_reachable());

    let (status, label) = if reachable {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = serde_json::json!({
        "status": label,
        "persistence_reachable": reachable,
        "connections": connections,
    });
    (status, Json(body))
}

/// Connection and simulation counters.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let connections = state.hub().stats().await;
    let simulation = match &state.coordinator {
        Some(coordinator) => Some(coordinator.stats().await),
        None => None,
    };
    Json(StatsResponse {
        connections,
        simulation,
    })
}

/// Subscription state of one connection.
pub async fn connection_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    let id: ConnectionId = id
        .parse()
        .map_err(|e| ApiError::InvalidUuid(format!("{id}: {e}")))?;
    state
        .hub()
        .status(id)
        .await
        .map(Json)
        .map_err(|_unknown| ApiError::NotFound(format!("connection {id}")))
}
