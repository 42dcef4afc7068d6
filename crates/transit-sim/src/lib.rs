//! Route geometry, delay model and per-trip motion simulator.
//!
//! Vehicles in this system carry no GPS; their positions are simulated by
//! moving along the great-circle segments between consecutive stops at a
//! speed that the delay model perturbs at every stop.
//!
//! # Modules
//!
//! - [`geometry`] -- Haversine distance, interpolation, bearings, segment
//!   construction and the per-route segment cache.
//! - [`delay`] -- Time-of-day traffic delay and operational event sampling.
//! - [`simulator`] -- [`TripSimulator`], the per-trip state machine.
//! - [`error`] -- Geometry and step failures.
//!
//! Everything here is synchronous and free of I/O. Randomness comes from a
//! caller-supplied [`rand::Rng`].

pub mod delay;
pub mod error;
pub mod geometry;
pub mod simulator;

pub use delay::{SegmentDelay, TrafficBand};
pub use error::{GeometryError, SimulationStepError};
pub use geometry::{RouteSegment, SegmentCache, build_segments, haversine_km, interpolate};
pub use simulator::{SegmentTransition, SimulatorConfig, SimulatorState, StepReport, TripSimulator};
