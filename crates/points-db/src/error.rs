//! Error types for the data layer.
//!
//! Backend failures are collected in [`DbError`] and converted into the
//! engine's [`RepositoryError`] and [`AuditError`], and the producer's
//! [`BoostError`], at the trait boundary.

use points_boost::BoostError;
use points_core::{AuditError, RepositoryError};

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row does not describe a valid snapshot.
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for RepositoryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Serialization(_) | DbError::InvalidRow(_) => {
                Self::Serialization(err.to_string())
            }
            DbError::Postgres(_)
            | DbError::Migration(_)
            | DbError::Dragonfly(_)
            | DbError::Config(_) => Self::Backend(err.to_string()),
        }
    }
}

impl From<DbError> for BoostError {
    fn from(err: DbError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<DbError> for AuditError {
    fn from(err: DbError) -> Self {
        Self::Sink(err.to_string())
    }
}
