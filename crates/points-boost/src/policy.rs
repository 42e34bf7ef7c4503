//! Mapping from an account's active boosts to a points multiplier.
//!
//! Each deployment fixes one [`PolicyShape`] and one table of named boost
//! weights. A weight may change at cutover instants (a boost worth +0.5
//! before a season boundary and +0.1 after it), applied independently per
//! named boost. The policy is static configuration: it is loaded and
//! validated once, then only evaluated.

use points_types::{BoostRecord, TimestampMilli};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BoostError;

/// Start of the first rewards season (2024-12-12T00:00:00Z), where the
/// additive preset lowers most boost increments.
pub const SEASON_ONE_CUTOVER: TimestampMilli = TimestampMilli(1_733_961_600_000);

/// How active boost weights combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyShape {
    /// Start at 1 and add each active boost's increment.
    #[default]
    Additive,
    /// Start at 1 and multiply by each active boost's factor.
    Multiplicative,
}

/// A change in a boost's weight effective from `from_milli`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cutover {
    /// First instant the new weight applies.
    pub from_milli: TimestampMilli,
    /// The weight from that instant.
    pub value: Decimal,
}

/// The weight of one named boost over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostWeight {
    /// Boost flag name, as served by the boost source.
    pub name: String,
    /// Weight before the first cutover.
    pub base: Decimal,
    /// Weight changes, in any order.
    #[serde(default)]
    pub cutovers: Vec<Cutover>,
}

impl BoostWeight {
    /// A weight that never changes.
    pub fn fixed(name: &str, value: Decimal) -> Self {
        Self {
            name: name.to_owned(),
            base: value,
            cutovers: Vec::new(),
        }
    }

    /// A weight that switches from `before` to `after` at `cutover`.
    pub fn with_cutover(
        name: &str,
        before: Decimal,
        cutover: TimestampMilli,
        after: Decimal,
    ) -> Self {
        Self {
            name: name.to_owned(),
            base: before,
            cutovers: vec![Cutover {
                from_milli: cutover,
                value: after,
            }],
        }
    }

    /// The weight in effect at `at`.
    pub fn value_at(&self, at: TimestampMilli) -> Decimal {
        self.cutovers
            .iter()
            .filter(|c| c.from_milli <= at)
            .max_by_key(|c| c.from_milli)
            .map_or(self.base, |c| c.value)
    }

    fn values(&self) -> impl Iterator<Item = Decimal> + '_ {
        std::iter::once(self.base).chain(self.cutovers.iter().map(|c| c.value))
    }
}

/// A boost record together with the multiplier derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedBoost {
    /// The record in effect.
    pub record: BoostRecord,
    /// The multiplier computed from `record`.
    pub multiplier: Decimal,
}

/// The per-deployment multiplier table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierPolicy {
    /// How weights combine.
    #[serde(default)]
    pub shape: PolicyShape,
    /// One entry per named boost.
    #[serde(default)]
    pub boosts: Vec<BoostWeight>,
}

impl MultiplierPolicy {
    /// Additive table with the season-one cutover: `dinero` and
    /// `hyperliquid` drop from +0.5 to +0.1, `blueprint` stays at +0.25.
    pub fn season_one_additive() -> Self {
        Self {
            shape: PolicyShape::Additive,
            boosts: vec![
                BoostWeight::with_cutover(
                    "dinero",
                    Decimal::new(5, 1),
                    SEASON_ONE_CUTOVER,
                    Decimal::new(1, 1),
                ),
                BoostWeight::with_cutover(
                    "blueprint",
                    Decimal::new(25, 2),
                    SEASON_ONE_CUTOVER,
                    Decimal::new(25, 2),
                ),
                BoostWeight::with_cutover(
                    "hyperliquid",
                    Decimal::new(5, 1),
                    SEASON_ONE_CUTOVER,
                    Decimal::new(1, 1),
                ),
            ],
        }
    }

    /// Multiplicative table doubling for each of `dinero` and `blueprint`.
    pub fn doubling() -> Self {
        Self {
            shape: PolicyShape::Multiplicative,
            boosts: vec![
                BoostWeight::fixed("dinero", Decimal::TWO),
                BoostWeight::fixed("blueprint", Decimal::TWO),
            ],
        }
    }

    /// Check that every combination of active boosts yields a multiplier of
    /// at least one and that boost names are unique.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Policy`] describing the first offending entry.
    pub fn validate(&self) -> Result<(), BoostError> {
        let mut seen = std::collections::BTreeSet::new();
        for weight in &self.boosts {
            if weight.name.is_empty() {
                return Err(BoostError::Policy("boost name must not be empty".to_owned()));
            }
            if !seen.insert(weight.name.as_str()) {
                return Err(BoostError::Policy(format!(
                    "boost {} listed more than once",
                    weight.name
                )));
            }
            let floor = match self.shape {
                PolicyShape::Additive => Decimal::ZERO,
                PolicyShape::Multiplicative => Decimal::ONE,
            };
            if let Some(bad) = weight.values().find(|v| *v < floor) {
                return Err(BoostError::Policy(format!(
                    "{:?} weight for {} must be at least {floor}, got {bad}",
                    self.shape, weight.name
                )));
            }
        }
        Ok(())
    }

    /// Names of every boost the table knows about.
    pub fn flag_names(&self) -> Vec<String> {
        self.boosts.iter().map(|w| w.name.clone()).collect()
    }

    /// The multiplier for `record` evaluated at `at`.
    ///
    /// Flags on the record that the table does not list contribute nothing.
    pub fn multiplier_at(&self, record: &BoostRecord, at: TimestampMilli) -> Decimal {
        let active = self
            .boosts
            .iter()
            .filter(|w| record.flags.contains(&w.name))
            .map(|w| w.value_at(at));
        match self.shape {
            PolicyShape::Additive => active.fold(Decimal::ONE, Decimal::saturating_add),
            PolicyShape::Multiplicative => active.fold(Decimal::ONE, Decimal::saturating_mul),
        }
    }

    /// Pair `record` with its multiplier at `at`.
    pub fn apply(&self, record: BoostRecord, at: TimestampMilli) -> AppliedBoost {
        let multiplier = self.multiplier_at(&record, at);
        AppliedBoost { record, multiplier }
    }
}

#[cfg(test)]
mod tests {
    use points_types::{Account, BoostFlags};
    use rust_decimal_macros::dec;

    use super::*;

    fn record(flags: &[&str]) -> BoostRecord {
        BoostRecord::new(
            Account::new("0xabc"),
            TimestampMilli(0),
            flags.iter().copied().collect::<BoostFlags>(),
        )
    }

    #[test]
    fn no_boosts_is_identity() {
        let policy = MultiplierPolicy::season_one_additive();
        assert_eq!(policy.multiplier_at(&record(&[]), TimestampMilli(0)), Decimal::ONE);
        assert_eq!(
            MultiplierPolicy::default().multiplier_at(&record(&["dinero"]), TimestampMilli(0)),
            Decimal::ONE
        );
    }

    #[test]
    fn additive_increments_change_at_cutover() {
        let policy = MultiplierPolicy::season_one_additive();
        let all = record(&["dinero", "blueprint", "hyperliquid"]);

        let before = TimestampMilli(1_733_961_599_999);
        assert_eq!(policy.multiplier_at(&all, before), dec!(2.25));
        assert_eq!(policy.multiplier_at(&all, SEASON_ONE_CUTOVER), dec!(1.45));

        let dinero = record(&["dinero"]);
        assert_eq!(policy.multiplier_at(&dinero, before), dec!(1.5));
        assert_eq!(policy.multiplier_at(&dinero, SEASON_ONE_CUTOVER), dec!(1.1));
    }

    #[test]
    fn multiplicative_factors_compound() {
        let policy = MultiplierPolicy::doubling();
        assert_eq!(policy.multiplier_at(&record(&["dinero"]), TimestampMilli(0)), dec!(2));
        assert_eq!(
            policy.multiplier_at(&record(&["dinero", "blueprint"]), TimestampMilli(0)),
            dec!(4)
        );
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let policy = MultiplierPolicy::doubling();
        assert_eq!(
            policy.multiplier_at(&record(&["hyperliquid"]), TimestampMilli(0)),
            Decimal::ONE
        );
    }

    #[test]
    fn latest_cutover_wins_regardless_of_order() {
        let weight = BoostWeight {
            name: "dinero".to_owned(),
            base: dec!(0.5),
            cutovers: vec![
                Cutover {
                    from_milli: TimestampMilli(200),
                    value: dec!(0.1),
                },
                Cutover {
                    from_milli: TimestampMilli(100),
                    value: dec!(0.3),
                },
            ],
        };
        assert_eq!(weight.value_at(TimestampMilli(99)), dec!(0.5));
        assert_eq!(weight.value_at(TimestampMilli(150)), dec!(0.3));
        assert_eq!(weight.value_at(TimestampMilli(200)), dec!(0.1));
    }

    #[test]
    fn validation_rejects_sub_unit_multipliers() {
        assert!(MultiplierPolicy::season_one_additive().validate().is_ok());
        assert!(MultiplierPolicy::doubling().validate().is_ok());

        let shrinking = MultiplierPolicy {
            shape: PolicyShape::Multiplicative,
            boosts: vec![BoostWeight::fixed("dinero", dec!(0.5))],
        };
        assert!(matches!(shrinking.validate(), Err(BoostError::Policy(_))));

        let negative = MultiplierPolicy {
            shape: PolicyShape::Additive,
            boosts: vec![BoostWeight::with_cutover(
                "dinero",
                dec!(0.5),
                TimestampMilli(10),
                dec!(-0.1),
            )],
        };
        assert!(negative.validate().is_err());

        let duplicate = MultiplierPolicy {
            shape: PolicyShape::Additive,
            boosts: vec![
                BoostWeight::fixed("dinero", dec!(0.1)),
                BoostWeight::fixed("dinero", dec!(0.2)),
            ],
        };
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn policy_parses_from_json() {
        let json = r#"{
            "shape": "additive",
            "boosts": [
                { "name": "dinero", "base": "0.5",
                  "cutovers": [{ "from_milli": 1733961600000, "value": "0.1" }] }
            ]
        }"#;
        let policy: MultiplierPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.flag_names(), vec!["dinero".to_owned()]);
        assert_eq!(
            policy.multiplier_at(&record(&["dinero"]), SEASON_ONE_CUTOVER),
            dec!(1.1)
        );
    }
}
