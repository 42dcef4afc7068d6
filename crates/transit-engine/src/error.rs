//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup.

use transit_core::ConfigError;
use transit_core::predictor::EstimatorError;
use transit_db::DbError;
use transit_hub::auth::AuthError;
use transit_hub::startup::StartupError;

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The delay estimator could not be built.
    #[error("estimator error: {source}")]
    Estimator {
        /// The underlying estimator error.
        #[from]
        source: EstimatorError,
    },

    /// Connecting to or migrating the database failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: DbError,
    },

    /// The static token table is malformed.
    #[error("token table error: {source}")]
    Auth {
        /// The underlying verifier error.
        #[from]
        source: AuthError,
    },

    /// The hub server failed to start.
    #[error("hub error: {source}")]
    Hub {
        /// The underlying startup error.
        #[from]
        source: StartupError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
