//! The valuation capability the engine calls for an entity's current state.

use std::future::Future;

use points_types::{Account, EntityId, Holdings, TimestampMilli};

/// Current on-chain state of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    /// Controlling account, for transferable positions.
    pub owner: Option<Account>,
    /// Quantities held now.
    pub holdings: Holdings,
}

impl EntityState {
    /// State with no owner.
    pub const fn unowned(holdings: Holdings) -> Self {
        Self {
            owner: None,
            holdings,
        }
    }

    /// State controlled by `owner`.
    pub const fn owned(owner: Account, holdings: Holdings) -> Self {
        Self {
            owner: Some(owner),
            holdings,
        }
    }
}

/// Outcome of valuing an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Valuation {
    /// The entity exists and has this state.
    Found(EntityState),
    /// The entity no longer exists (for example a burned position).
    NotFound,
    /// The lookup failed for an infrastructure reason.
    TransientError(String),
}

/// Values entities as of a point in time.
///
/// Implementations decide how to value each [`points_types::EntityKind`];
/// the engine treats the result as opaque apart from the three outcomes.
pub trait ValuationProvider: Send + Sync {
    /// Value `entity` as of `as_of`.
    fn value_of(
        &self,
        entity: &EntityId,
        as_of: TimestampMilli,
    ) -> impl Future<Output = Valuation> + Send;
}
