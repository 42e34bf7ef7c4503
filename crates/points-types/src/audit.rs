//! The append-only `point_update` audit record.
//!
//! One record is emitted per engine invocation. Downstream aggregation sums
//! `points` per account to produce program totals, so the field names here
//! are a compatibility contract: rename nothing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::boost::BoostRecord;
use crate::ids::{EntityId, TimestampMilli};
use crate::snapshot::Snapshot;

/// Event name under which audit records are published.
pub const POINT_UPDATE_EVENT: &str = "point_update";

/// Owner rendering for absent owners and terminal states.
pub const NO_OWNER: &str = "none";

/// One side (before or after) of an audited transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditState {
    /// Controlling account, or [`NO_OWNER`].
    pub owner: String,
    /// Evaluation time of this state.
    pub timestamp_milli: TimestampMilli,
    /// Accrual basis value.
    pub value: Decimal,
    /// Named raw amounts.
    pub amounts: BTreeMap<String, Decimal>,
}

impl AuditState {
    /// The state recorded in a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            owner: snapshot
                .owner
                .as_ref()
                .map_or_else(|| NO_OWNER.to_owned(), ToString::to_string),
            timestamp_milli: snapshot.timestamp_milli,
            value: snapshot.holdings.value,
            amounts: snapshot.holdings.amounts.clone(),
        }
    }

    /// Zero defaults used as the "before" side of a first observation.
    pub fn absent() -> Self {
        Self {
            owner: NO_OWNER.to_owned(),
            timestamp_milli: TimestampMilli::EPOCH,
            value: Decimal::ZERO,
            amounts: BTreeMap::new(),
        }
    }

    /// The "after" side of a removed entity: no owner, zero value at `now`,
    /// keeping the amount names of the last known state.
    pub fn terminal(prior: Option<&Snapshot>, now: TimestampMilli) -> Self {
        Self {
            owner: NO_OWNER.to_owned(),
            timestamp_milli: now,
            value: Decimal::ZERO,
            amounts: prior
                .map(|s| s.holdings.zeroed().amounts)
                .unwrap_or_default(),
        }
    }
}

/// Points accrued by one entity in one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id (`UUIDv7`, time-ordered).
    pub id: Uuid,
    /// The processed entity.
    pub entity_id: EntityId,
    /// The account credited with the points, or [`NO_OWNER`].
    pub account: String,
    /// What caused this evaluation (event name or `TimeInterval`).
    pub trigger: String,
    /// Points accrued since the prior snapshot.
    pub points: Decimal,
    /// State before the transition.
    pub before: AuditState,
    /// State after the transition.
    pub after: AuditState,
    /// The boost record in effect for the multiplier.
    pub boosts: BoostRecord,
    /// The multiplier derived from `boosts`.
    pub multiplier: Decimal,
    /// Wall-clock time the record was produced.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::ids::Account;
    use crate::snapshot::Holdings;

    #[test]
    fn terminal_state_zeroes_prior_amounts() {
        let prior = Snapshot::new(
            EntityId::position("42").unwrap(),
            TimestampMilli(10),
            Some(Account::new("0xowner")),
            Holdings::new(dec!(300))
                .with_amount("amount0", dec!(100))
                .with_amount("amount1", dec!(200)),
        );
        let terminal = AuditState::terminal(Some(&prior), TimestampMilli(20));
        assert_eq!(terminal.owner, NO_OWNER);
        assert_eq!(terminal.timestamp_milli, TimestampMilli(20));
        assert_eq!(terminal.value, Decimal::ZERO);
        assert_eq!(terminal.amounts.get("amount0"), Some(&Decimal::ZERO));
        assert_eq!(terminal.amounts.get("amount1"), Some(&Decimal::ZERO));
    }

    #[test]
    fn before_state_defaults() {
        let absent = AuditState::absent();
        assert_eq!(absent.owner, "none");
        assert_eq!(absent.timestamp_milli, TimestampMilli::EPOCH);
        assert!(absent.amounts.is_empty());
    }
}
