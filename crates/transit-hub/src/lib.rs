//! Realtime connection hub for Transit Live.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) for live trip updates, route status,
//!   user notifications and system alerts
//! - **REST endpoints** for connection and simulation statistics and a
//!   health check that reflects persistence reachability
//!
//! # Architecture
//!
//! A single [`ConnectionHub`] owns every live session and the
//! [`SubscriptionRegistry`] indices (route, trip and user to connections).
//! Client frames are routed to hub operations by the [`MessageRouter`].
//! The simulation reaches clients through the [`BroadcastDispatcher`],
//! which implements [`transit_core::EventSink`]: it copies the subscriber
//! set under the registry lock and queues the message to each connection's
//! bounded outbound queue outside it.
//!
//! [`ConnectionHub`]: hub::ConnectionHub
//! [`SubscriptionRegistry`]: registry::SubscriptionRegistry
//! [`MessageRouter`]: handler::MessageRouter
//! [`BroadcastDispatcher`]: dispatch::BroadcastDispatcher

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod hub;
pub mod registry;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use auth::{StaticTokenVerifier, TokenVerifier};
pub use dispatch::BroadcastDispatcher;
pub use error::{DeliveryError, HubError};
pub use handler::MessageRouter;
pub use hub::{ConnectionHub, HubStats};
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use startup::{HubTasks, spawn_hub};
pub use state::AppState;
