//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors. At the [`TripStore`](transit_core::TripStore) boundary
//! they are folded into [`StoreError`] so the coordinator can tell an
//! unreachable database apart from a single bad query.

use transit_core::StoreError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A row held a value the domain types cannot represent.
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        /// Table the row came from.
        entity: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// An update matched no row.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Table that was updated.
        entity: &'static str,
        /// Identifier that missed.
        id: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Whether the error means the database itself cannot be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Postgres(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_connectivity() {
            return Self::Unavailable {
                message: err.to_string(),
            };
        }
        match err {
            DbError::Corrupt { entity, message } => Self::Corrupt { entity, message },
            DbError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Query {
                message: other.to_string(),
            },
        }
    }
}
