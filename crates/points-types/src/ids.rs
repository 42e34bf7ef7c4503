//! Identifiers for accounts, tracked entities, and points of time.
//!
//! Accounts are chain addresses compared case-insensitively, so the
//! [`Account`] newtype lower-cases on construction and nothing downstream
//! ever has to remember to do it. Tracked entities come in three kinds
//! (plain account balances, pool shares, and non-fungible positions) and
//! share a single string rendering used as the repository key.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds in one day, the unit of the daily points rate.
pub const MILLISECONDS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Errors produced when parsing identifiers from their string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The string is empty or only whitespace.
    #[error("entity id must not be empty")]
    Empty,

    /// The string does not match any entity id shape.
    #[error("unrecognized entity id: {0}")]
    Unrecognized(String),
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A chain account address, normalized to lower case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Account(String);

impl Account {
    /// Create an account from any casing of an address.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    /// Return the normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the zero address used as the counterparty of mints
    /// and burns.
    pub fn is_null(&self) -> bool {
        let digits = self.0.strip_prefix("0x").unwrap_or(&self.0);
        !digits.is_empty() && digits.bytes().all(|b| b == b'0')
    }
}

impl core::fmt::Display for Account {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Account {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for Account {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.0
    }
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// The kind of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A plain token or vault balance held by an account.
    Account,
    /// An account's share of a fungible liquidity pool.
    PoolShare,
    /// A non-fungible liquidity position.
    Position,
}

impl EntityKind {
    /// Stable string used in storage columns.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::PoolShare => "pool_share",
            Self::Position => "position",
        }
    }
}

/// Identity of a tracked entity.
///
/// Renders as the account address, `"<pool>.<account>"`, or the position
/// token id. [`FromStr`] accepts exactly those renderings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityId {
    /// A balance held directly by an account.
    Account(Account),
    /// An account's share in a pool.
    PoolShare {
        /// The pool contract address.
        pool: Account,
        /// The liquidity provider.
        account: Account,
    },
    /// A non-fungible position identified by its token id.
    Position(String),
}

impl EntityId {
    /// Identity of a plain account balance.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Unrecognized`] unless `address` is `0x`-prefixed
    /// with no dots or whitespace.
    pub fn account(address: &str) -> Result<Self, IdError> {
        Ok(Self::Account(address_part(address)?))
    }

    /// Identity of an account's share in `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Unrecognized`] unless both parts are addresses.
    pub fn pool_share(pool: &str, account: &str) -> Result<Self, IdError> {
        Ok(Self::PoolShare {
            pool: address_part(pool)?,
            account: address_part(account)?,
        })
    }

    /// Identity of a non-fungible position.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Unrecognized`] unless `token_id` is a decimal
    /// integer.
    pub fn position(token_id: impl Into<String>) -> Result<Self, IdError> {
        let token_id = token_id.into();
        let digits = token_id.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::Unrecognized(token_id));
        }
        Ok(Self::Position(digits.to_owned()))
    }

    /// The kind of entity this id names.
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Account(_) => EntityKind::Account,
            Self::PoolShare { .. } => EntityKind::PoolShare,
            Self::Position(_) => EntityKind::Position,
        }
    }

    /// The account embedded in the id, if the kind carries one.
    pub const fn embedded_account(&self) -> Option<&Account> {
        match self {
            Self::Account(account) | Self::PoolShare { account, .. } => Some(account),
            Self::Position(_) => None,
        }
    }

    /// The pool embedded in the id, for pool shares.
    pub const fn pool(&self) -> Option<&Account> {
        match self {
            Self::PoolShare { pool, .. } => Some(pool),
            Self::Account(_) | Self::Position(_) => None,
        }
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Account(account) => write!(f, "{account}"),
            Self::PoolShare { pool, account } => write!(f, "{pool}.{account}"),
            Self::Position(token_id) => f.write_str(token_id),
        }
    }
}

impl FromStr for EntityId {
    type Err = IdError;

    /// Accepts exactly the strings [`Display`](core::fmt::Display) renders.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if let Some((pool, account)) = s.split_once('.') {
            return Self::pool_share(pool, account);
        }
        if has_hex_prefix(s) {
            return Self::account(s);
        }
        Self::position(s)
    }
}

fn has_hex_prefix(s: &str) -> bool {
    s.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("0x"))
}

/// Validate one address component of an id. Dots separate pool from
/// account, so an address may not contain one.
fn address_part(raw: &str) -> Result<Account, IdError> {
    let trimmed = raw.trim();
    let valid = has_hex_prefix(trimmed)
        && trimmed.len() > 2
        && !trimmed.bytes().any(|b| b == b'.' || b.is_ascii_whitespace());
    if valid {
        Ok(Account::new(trimmed))
    } else {
        Err(IdError::Unrecognized(raw.to_owned()))
    }
}

impl TryFrom<String> for EntityId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// TimestampMilli
// ---------------------------------------------------------------------------

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TimestampMilli(pub u64);

impl TimestampMilli {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    /// Return the raw millisecond count.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, if `self` is not
    /// before `earlier`.
    pub const fn checked_since(self, earlier: Self) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }

    /// Convert from a UTC datetime. Instants before the epoch clamp to it.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(u64::try_from(at.timestamp_millis()).unwrap_or(0))
    }

    /// Convert to a UTC datetime, if representable.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.0).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }
}

impl core::fmt::Display for TimestampMilli {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TimestampMilli {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}
