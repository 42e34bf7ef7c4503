//! Triggers: the occurrences that cause entities to be re-evaluated.

use std::collections::BTreeSet;

use points_types::{EntityId, TimestampMilli};
use serde::{Deserialize, Serialize};

/// Label of the periodic reconciliation trigger.
pub const TIME_INTERVAL_TRIGGER: &str = "TimeInterval";

/// A chain event or timer tick affecting one or more entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// What happened (an event name such as `Transfer`).
    pub label: String,
    /// Evaluation time, normally the block timestamp.
    pub timestamp_milli: TimestampMilli,
    /// Every entity the occurrence touched.
    pub entities: Vec<EntityId>,
}

impl Trigger {
    /// Create a trigger.
    pub fn new(label: &str, timestamp_milli: TimestampMilli, entities: Vec<EntityId>) -> Self {
        Self {
            label: label.to_owned(),
            timestamp_milli,
            entities,
        }
    }

    /// The entities to process: duplicates collapsed, and entities keyed by
    /// the zero address (the counterparty of mints and burns) skipped.
    pub fn affected(&self) -> Vec<EntityId> {
        let unique: BTreeSet<&EntityId> = self
            .entities
            .iter()
            .filter(|id| !id.embedded_account().is_some_and(points_types::Account::is_null))
            .collect();
        unique.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: &str = "0x0000000000000000000000000000000000000000";

    #[test]
    fn affected_skips_null_address_and_duplicates() {
        let trigger = Trigger::new(
            "Transfer",
            TimestampMilli(10),
            vec![
                EntityId::account(ZERO).unwrap(),
                EntityId::account("0xabc").unwrap(),
                EntityId::account("0xABC").unwrap(),
                EntityId::pool_share("0xpool", ZERO).unwrap(),
                EntityId::position("0").unwrap(),
            ],
        );
        assert_eq!(
            trigger.affected(),
            vec![EntityId::account("0xabc").unwrap(), EntityId::position("0").unwrap()]
        );
    }

    #[test]
    fn trigger_json_shape() {
        let json = r#"{"label":"Deposit","timestamp_milli":86400000,"entities":["0xAbc","7"]}"#;
        let trigger: Trigger = serde_json::from_str(json).unwrap();
        assert_eq!(trigger.label, "Deposit");
        assert_eq!(trigger.entities[0], EntityId::account("0xabc").unwrap());
        assert_eq!(trigger.entities[1], EntityId::position("7").unwrap());
    }
}
