//! Error types for the realtime hub.
//!
//! [`HubError`] covers rejected client requests and is turned into an
//! `error` reply on the requesting connection. [`DeliveryError`] is a
//! per-connection send failure; it is logged and never removes the
//! connection. [`ApiError`] converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use transit_types::ConnectionId;

/// A client request the hub refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The connection is not (or no longer) registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The request needs an authenticated connection.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The connection is authenticated as someone else.
    #[error("Unauthorized")]
    Unauthorized,

    /// The frame could not be decoded into a known message.
    #[error("Invalid message: {0}")]
    InvalidRequest(String),
}

/// Why a message could not be queued for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's outbound queue is full.
    #[error("outbound queue of {0} is full")]
    Full(ConnectionId),

    /// The connection's writer has gone away.
    #[error("outbound queue of {0} is closed")]
    Closed(ConnectionId),
}

/// Errors surfaced by the REST endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A UUID could not be parsed from the request path.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::InvalidUuid(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
