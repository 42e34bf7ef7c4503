//! Points accrual engine.
//!
//! [`AccrualEngine`] turns triggers into audit records and replacement
//! snapshots. It reaches the outside world only through the collaborator
//! traits defined here: [`ValuationProvider`] for current entity state,
//! [`SnapshotRepository`] for prior state, and [`AuditSink`] for the
//! `point_update` records.

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod repository;
pub mod trigger;
pub mod valuation;

pub use audit::{AUDIT_TARGET, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{ConfigError, IndexerConfig};
pub use engine::{
    Accrual, AccrualEngine, DEFAULT_MAX_CONCURRENCY, EntityFailure, TriggerReport, accrued_points,
};
pub use error::{AuditError, EngineError, RepositoryError};
pub use repository::{MemorySnapshotRepository, SnapshotFilter, SnapshotRepository};
pub use trigger::{TIME_INTERVAL_TRIGGER, Trigger};
pub use valuation::{EntityState, Valuation, ValuationProvider};
