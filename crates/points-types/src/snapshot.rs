//! Point-in-time state of a tracked entity.
//!
//! A [`Snapshot`] is never mutated in place: the accrual engine replaces it
//! wholesale with a freshly computed one on every trigger, or deletes it
//! when the underlying entity ceases to exist.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{Account, EntityId, TimestampMilli};

/// The quantities held by an entity at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holdings {
    /// The accrual basis: a USD value or a token balance, depending on the
    /// deployment. Points accrue proportionally to this value.
    pub value: Decimal,
    /// Named raw token quantities (e.g. `amount0`, `amount1`, `balance`).
    #[serde(default)]
    pub amounts: BTreeMap<String, Decimal>,
}

impl Holdings {
    /// Holdings with the given accrual basis and no itemized amounts.
    pub const fn new(value: Decimal) -> Self {
        Self {
            value,
            amounts: BTreeMap::new(),
        }
    }

    /// Add a named raw amount.
    #[must_use]
    pub fn with_amount(mut self, name: impl Into<String>, amount: Decimal) -> Self {
        self.amounts.insert(name.into(), amount);
        self
    }

    /// The same amount names, each set to zero.
    #[must_use]
    pub fn zeroed(&self) -> Self {
        Self {
            value: Decimal::ZERO,
            amounts: self
                .amounts
                .keys()
                .map(|name| (name.clone(), Decimal::ZERO))
                .collect(),
        }
    }
}

/// Last-recorded state of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The entity this snapshot describes.
    pub id: EntityId,
    /// The evaluation time the snapshot was computed for.
    pub timestamp_milli: TimestampMilli,
    /// The controlling account, for transferable positions.
    #[serde(default)]
    pub owner: Option<Account>,
    /// Quantities held as of `timestamp_milli`.
    pub holdings: Holdings,
}

impl Snapshot {
    /// Create a snapshot.
    pub const fn new(
        id: EntityId,
        timestamp_milli: TimestampMilli,
        owner: Option<Account>,
        holdings: Holdings,
    ) -> Self {
        Self {
            id,
            timestamp_milli,
            owner,
            holdings,
        }
    }

    /// The account whose boosts apply to this entity: the owner when the
    /// entity is transferable, otherwise the account embedded in its id.
    pub fn boost_account(&self) -> Option<&Account> {
        self.owner.as_ref().or_else(|| self.id.embedded_account())
    }
}
