//! `PostgreSQL` persistence for the Transit Live realtime core.
//!
//! The coordinator in `transit-core` only knows the
//! [`TripStore`](transit_core::TripStore) trait. This crate provides the
//! production implementation of it on top of a [`sqlx`] pool, together
//! with the pool configuration and the schema migrations.
//!
//! # Tables
//!
//! ```text
//! routes ──< route_stops >── stops
//!   │
//!   ├──< trips            (status, position JSONB, delay, served stops)
//!   └──< subscriptions    (user follows route)
//! notifications           (dedup key: user, trip, type)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`trip_store`] -- [`PgTripStore`], the `TripStore` implementation
//! - [`error`] -- Shared error types

pub mod error;
pub mod postgres;
pub mod trip_store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use trip_store::PgTripStore;
