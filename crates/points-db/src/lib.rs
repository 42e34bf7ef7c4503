//! Persistent collaborators for the accrual engine.
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` pool opened from the infrastructure config
//! - [`snapshot_store`] -- `snapshots` table repository
//! - [`audit_store`] -- append-only `point_updates` audit sink
//! - [`boost_store`] -- producer-side `boost_snapshots` and `boosts` tables
//! - [`dragonfly`] -- `Dragonfly` snapshot repository
//! - [`error`] -- shared error type

pub mod audit_store;
pub mod boost_store;
pub mod dragonfly;
pub mod error;
pub mod postgres;
pub mod snapshot_store;

pub use audit_store::PgAuditSink;
pub use boost_store::{BoostSnapshotRow, PgBoostEventSink, PgBoostSnapshotStore};
pub use dragonfly::{
    DragonflyPool, DragonflySnapshotRepository, SNAPSHOT_INDEX_KEY, snapshot_key,
};
pub use error::DbError;
pub use postgres::PostgresPool;
pub use snapshot_store::{PgSnapshotRepository, SnapshotRow};
