//! Named boost flags and the time-stamped records that carry them.
//!
//! Per account, a time-ordered sequence of [`BoostRecord`] values forms a
//! step function: the active record at time `T` is the last record with
//! `timestamp_milli <= T`, or [`BoostRecord::inactive`] before the first.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{Account, TimestampMilli};

/// The set of active named boosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoostFlags(BTreeSet<String>);

impl BoostFlags {
    /// No active boosts.
    pub const fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Activate a named boost.
    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    /// Turn a named boost on or off. Returns whether the set changed.
    pub fn set(&mut self, name: &str, on: bool) -> bool {
        if on {
            self.0.insert(name.to_owned())
        } else {
            self.0.remove(name)
        }
    }

    /// Whether the named boost is active.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Whether no boost is active.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the active boost names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for BoostFlags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// The boosts an account held from `timestamp_milli` onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostRecord {
    /// The boosted account.
    pub account: Account,
    /// When this record became active.
    pub timestamp_milli: TimestampMilli,
    /// The boosts active from that time.
    pub flags: BoostFlags,
}

impl BoostRecord {
    /// Create a record.
    pub const fn new(account: Account, timestamp_milli: TimestampMilli, flags: BoostFlags) -> Self {
        Self {
            account,
            timestamp_milli,
            flags,
        }
    }

    /// The all-false default served for unknown accounts and for times
    /// before an account's first record.
    pub const fn inactive(account: Account, at: TimestampMilli) -> Self {
        Self {
            account,
            timestamp_milli: at,
            flags: BoostFlags::none(),
        }
    }
}
