//! Shared type definitions for the points accrual workspace.
//!
//! Every crate in the workspace speaks in these types: the accrual engine
//! reads and writes [`Snapshot`] values, the boost store serves
//! [`BoostRecord`] values, and every engine invocation produces exactly one
//! [`AuditRecord`].
//!
//! # Modules
//!
//! - [`ids`] -- Accounts, entity identifiers, and millisecond timestamps
//! - [`snapshot`] -- Point-in-time state of a tracked entity
//! - [`boost`] -- Named boost flags and their time-stamped records
//! - [`audit`] -- The append-only `point_update` audit record

pub mod audit;
pub mod boost;
pub mod ids;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use audit::{AuditRecord, AuditState, NO_OWNER, POINT_UPDATE_EVENT};
pub use boost::{BoostFlags, BoostRecord};
pub use ids::{Account, EntityId, EntityKind, IdError, MILLISECONDS_PER_DAY, TimestampMilli};
pub use snapshot::{Holdings, Snapshot};
