//! Realtime simulation core for Transit Live.
//!
//! This crate drives every active bus trip once per tick: it resolves route
//! geometry, advances per-trip simulators, refines delays with an external
//! predictor, writes state back through the persistence boundary and hands
//! the results to an outbound event sink.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `transit-config.yaml` into
//!   strongly-typed structs.
//! - [`coordinator`] -- [`SimulationCoordinator`], the tick loop and trip
//!   lifecycle.
//! - [`dedup`] -- At-most-once delay notifications.
//! - [`geometry`] -- [`RouteGeometry`], cached route segment resolution.
//! - [`memory`] -- [`InMemoryStore`] for tests and offline runs.
//! - [`predictor`] -- [`DelayEstimator`] backends.
//! - [`sink`] -- [`EventSink`], the seam the realtime hub implements.
//! - [`store`] -- [`TripStore`], the persistence boundary.
//!
//! [`SimulationCoordinator`]: coordinator::SimulationCoordinator
//! [`RouteGeometry`]: geometry::RouteGeometry
//! [`InMemoryStore`]: memory::InMemoryStore
//! [`DelayEstimator`]: predictor::DelayEstimator
//! [`EventSink`]: sink::EventSink
//! [`TripStore`]: store::TripStore

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod geometry;
pub mod memory;
pub mod predictor;
pub mod sink;
pub mod store;

pub use config::{ConfigError, TransitConfig};
pub use coordinator::{CoordinatorStats, SimulationCoordinator, TickSummary};
pub use predictor::DelayEstimator;
pub use sink::{DispatchReport, EventSink};
pub use store::{StoreError, StoreFuture, TripPatch, TripStore};
