//! Error types for the accrual engine and its collaborators.

use points_boost::BoostError;
use points_types::EntityId;

/// Errors reported by a [`crate::SnapshotRepository`].
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The storage backend failed.
    #[error("snapshot backend error: {0}")]
    Backend(String),

    /// A stored snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(String),
}

/// Errors reported by an [`crate::AuditSink`].
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The sink could not accept the record.
    #[error("audit sink error: {0}")]
    Sink(String),
}

/// Errors that can occur while processing an entity.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The boost lookup failed.
    #[error("boost lookup failed: {0}")]
    Boost(#[from] BoostError),

    /// The valuation provider reported an infrastructure failure.
    #[error("valuation of {entity} failed: {detail}")]
    Valuation {
        /// The entity being valued.
        entity: EntityId,
        /// Provider-supplied detail.
        detail: String,
    },

    /// The snapshot repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The audit sink failed.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Decimal arithmetic overflowed while computing points.
    #[error("points overflow for {entity}")]
    Overflow {
        /// The entity whose accrual overflowed.
        entity: EntityId,
    },
}
