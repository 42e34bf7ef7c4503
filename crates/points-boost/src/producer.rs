//! Boost flag production from token transfers.
//!
//! Each [`FlagRule`] watches `Transfer` events of one or more tokens and
//! derives one named flag for the accounts on both sides. When a flag
//! changes, the account's latest [`BoostRecord`] is rewritten and a
//! `boosts` event is emitted; an unchanged flag writes nothing. The emitted
//! events are the time series a [`crate::BoostSource`] later serves.
//!
//! Balances are read from a single chain, so a deployment runs one
//! producer per network it watches.

use std::collections::HashMap;
use std::future::Future;

use points_types::{Account, BoostRecord, TimestampMilli};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::BoostError;

/// Event name of an emitted boost change.
pub const BOOST_EVENT: &str = "boosts";

/// Tracing target under which [`TracingBoostEventSink`] emits changes.
pub const BOOST_TARGET: &str = "points::boosts";

/// Dinero `pxETH` on Ethereum.
pub const DINERO_PXETH: &str = "0x04c154b66cb340f3ae24111cc767e0184ed00cc6";

/// Dinero `apxETH` on Ethereum.
pub const DINERO_APXETH: &str = "0x9ba021b0a9b958b5e75ce9f6dff97c7ee52cb3e6";

/// Blueprint ERC-721 collection on Arbitrum.
pub const BLUEPRINT_COLLECTION: &str = "0x2e1e87d0a10dd59c332b1c0e8a894b738df7059e";

/// One ERC-20 or ERC-721 `Transfer` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// The emitting contract.
    pub token: Account,
    /// Sender.
    pub from: Account,
    /// Recipient.
    pub to: Account,
    /// Amount, or the token id for ERC-721.
    pub value: u128,
    /// Block timestamp.
    pub timestamp_milli: TimestampMilli,
}

impl Transfer {
    /// Both sides of the transfer, without the null address and without
    /// repeating a self-transfer.
    pub fn parties(&self) -> Vec<&Account> {
        let mut parties = Vec::with_capacity(2);
        for account in [&self.from, &self.to] {
            if !account.is_null() && !parties.contains(&account) {
                parties.push(account);
            }
        }
        parties
    }
}

/// How one flag is derived from transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagRule {
    /// On while the account holds a positive balance of any of `tokens`.
    /// Re-checked for both parties of every transfer of those tokens.
    Holding {
        /// Flag name.
        flag: String,
        /// Watched tokens.
        tokens: Vec<Account>,
    },
    /// Turned on for both parties of a positive transfer of `token` to
    /// `recipient`. Never turned off.
    Bridged {
        /// Flag name.
        flag: String,
        /// Watched token.
        token: Account,
        /// The bridge contract receiving deposits.
        recipient: Account,
    },
}

impl FlagRule {
    /// `dinero`: holds `pxETH` or `apxETH`.
    pub fn dinero() -> Self {
        Self::Holding {
            flag: "dinero".to_owned(),
            tokens: vec![Account::new(DINERO_APXETH), Account::new(DINERO_PXETH)],
        }
    }

    /// `blueprint`: holds a Blueprint NFT.
    pub fn blueprint() -> Self {
        Self::Holding {
            flag: "blueprint".to_owned(),
            tokens: vec![Account::new(BLUEPRINT_COLLECTION)],
        }
    }

    /// The flag this rule sets.
    pub fn flag(&self) -> &str {
        match self {
            Self::Holding { flag, .. } | Self::Bridged { flag, .. } => flag,
        }
    }

    /// Whether `transfer` is relevant to this rule.
    pub fn matches(&self, transfer: &Transfer) -> bool {
        match self {
            Self::Holding { tokens, .. } => tokens.contains(&transfer.token),
            Self::Bridged {
                token, recipient, ..
            } => transfer.token == *token && transfer.to == *recipient && transfer.value > 0,
        }
    }
}

/// Check that every rule names a flag, that flags are unique, and that
/// holding rules watch at least one token.
///
/// # Errors
///
/// Returns [`BoostError::Policy`] describing the first offending rule.
pub fn validate_rules(rules: &[FlagRule]) -> Result<(), BoostError> {
    let mut seen = std::collections::BTreeSet::new();
    for rule in rules {
        let flag = rule.flag();
        if flag.trim().is_empty() {
            return Err(BoostError::Policy("boost rule without a flag name".to_owned()));
        }
        if !seen.insert(flag) {
            return Err(BoostError::Policy(format!("boost flag {flag} has two rules")));
        }
        if let FlagRule::Holding { tokens, .. } = rule
            && tokens.is_empty()
        {
            return Err(BoostError::Policy(format!("boost rule {flag} watches no token")));
        }
    }
    Ok(())
}

/// The record after setting `flag` to `on` at `at`, or `None` when the
/// flag already has that value.
pub fn update_flag(
    current: &BoostRecord,
    flag: &str,
    on: bool,
    at: TimestampMilli,
) -> Option<BoostRecord> {
    let mut flags = current.flags.clone();
    flags
        .set(flag, on)
        .then(|| BoostRecord::new(current.account.clone(), at, flags))
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Reads token balances on the producer's chain.
pub trait BalanceReader: Send + Sync {
    /// `balanceOf(holder)` on `token`, as a raw integer.
    fn balance_of(
        &self,
        token: &Account,
        holder: &Account,
    ) -> impl Future<Output = Result<u128, BoostError>> + Send;
}

/// Latest boost record per account, as maintained by the producer.
pub trait BoostSnapshotStore: Send + Sync {
    /// The latest record for `account`, if any.
    fn get(
        &self,
        account: &Account,
    ) -> impl Future<Output = Result<Option<BoostRecord>, BoostError>> + Send;

    /// Insert or replace records, keyed by account.
    fn upsert(
        &self,
        records: &[BoostRecord],
    ) -> impl Future<Output = Result<(), BoostError>> + Send;
}

/// Accepts boost change events.
pub trait BoostEventSink: Send + Sync {
    /// Record that `record` became the account's boost state.
    fn emit(&self, record: &BoostRecord) -> impl Future<Output = Result<(), BoostError>> + Send;
}

/// Boost records in process memory.
#[derive(Debug, Default)]
pub struct MemoryBoostSnapshotStore {
    records: Mutex<HashMap<Account, BoostRecord>>,
}

impl MemoryBoostSnapshotStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BoostSnapshotStore for MemoryBoostSnapshotStore {
    async fn get(&self, account: &Account) -> Result<Option<BoostRecord>, BoostError> {
        Ok(self.records.lock().await.get(account).cloned())
    }

    async fn upsert(&self, records: &[BoostRecord]) -> Result<(), BoostError> {
        let mut map = self.records.lock().await;
        for record in records {
            map.insert(record.account.clone(), record.clone());
        }
        Ok(())
    }
}

/// Emits each change as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBoostEventSink;

impl BoostEventSink for TracingBoostEventSink {
    async fn emit(&self, record: &BoostRecord) -> Result<(), BoostError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| BoostError::MalformedResponse(e.to_string()))?;
        tracing::info!(
            target: BOOST_TARGET,
            event = BOOST_EVENT,
            account = %record.account,
            at = %record.timestamp_milli,
            record = %payload,
        );
        Ok(())
    }
}

/// Keeps emitted changes in memory.
#[derive(Debug, Default)]
pub struct MemoryBoostEventSink {
    events: Mutex<Vec<BoostRecord>>,
}

impl MemoryBoostEventSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every change emitted so far, in order.
    pub async fn events(&self) -> Vec<BoostRecord> {
        self.events.lock().await.clone()
    }
}

impl BoostEventSink for MemoryBoostEventSink {
    async fn emit(&self, record: &BoostRecord) -> Result<(), BoostError> {
        self.events.lock().await.push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BoostProducer
// ---------------------------------------------------------------------------

/// Derives boost records from transfers.
pub struct BoostProducer<B, S, E> {
    balances: B,
    snapshots: S,
    events: E,
    rules: Vec<FlagRule>,
}

impl<B, S, E> BoostProducer<B, S, E>
where
    B: BalanceReader,
    S: BoostSnapshotStore,
    E: BoostEventSink,
{
    /// Create a producer applying `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Policy`] if the rules do not validate.
    pub fn new(
        balances: B,
        snapshots: S,
        events: E,
        rules: Vec<FlagRule>,
    ) -> Result<Self, BoostError> {
        validate_rules(&rules)?;
        Ok(Self {
            balances,
            snapshots,
            events,
            rules,
        })
    }

    /// The configured rules.
    pub fn rules(&self) -> &[FlagRule] {
        &self.rules
    }

    /// The snapshot store.
    pub const fn snapshots(&self) -> &S {
        &self.snapshots
    }

    /// The event sink.
    pub const fn events(&self) -> &E {
        &self.events
    }

    /// Apply every matching rule to both parties of `transfer`. Changed
    /// records are stored and then emitted, one per account. Returns the
    /// changed records.
    ///
    /// # Errors
    ///
    /// Propagates balance, store, and sink failures. Nothing is stored when
    /// a balance read fails.
    pub async fn on_transfer(&self, transfer: &Transfer) -> Result<Vec<BoostRecord>, BoostError> {
        let parties = transfer.parties();
        let mut changed: Vec<BoostRecord> = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.matches(transfer)) {
            for &account in &parties {
                let on = match rule {
                    FlagRule::Holding { tokens, .. } => self.holds_any(tokens, account).await?,
                    FlagRule::Bridged { .. } => true,
                };
                // An earlier rule may already have changed this account.
                let current = match changed.iter().find(|r| r.account == *account) {
                    Some(record) => record.clone(),
                    None => self.snapshots.get(account).await?.unwrap_or_else(|| {
                        BoostRecord::inactive(account.clone(), TimestampMilli::EPOCH)
                    }),
                };
                let at = transfer.timestamp_milli;
                let Some(next) = update_flag(&current, rule.flag(), on, at) else {
                    continue;
                };
                match changed.iter_mut().find(|r| r.account == next.account) {
                    Some(slot) => *slot = next,
                    None => changed.push(next),
                }
            }
        }

        if changed.is_empty() {
            return Ok(changed);
        }
        self.snapshots.upsert(&changed).await?;
        for record in &changed {
            self.events.emit(record).await?;
        }
        tracing::debug!(
            token = %transfer.token,
            at = %transfer.timestamp_milli,
            changed = changed.len(),
            "boost flags updated"
        );
        Ok(changed)
    }

    async fn holds_any(&self, tokens: &[Account], holder: &Account) -> Result<bool, BoostError> {
        for token in tokens {
            if self.balances.balance_of(token, holder).await? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";
    const NULL: &str = "0x0000000000000000000000000000000000000000";
    const USDC: &str = "0xaaaa000000000000000000000000000000000000";
    const BRIDGE: &str = "0xbbbb000000000000000000000000000000000000";

    #[derive(Default)]
    struct Balances {
        held: std::sync::Mutex<HashMap<(Account, Account), u128>>,
        reads: AtomicUsize,
        failing: AtomicBool,
    }

    impl Balances {
        fn hold(&self, token: &str, holder: &str, amount: u128) {
            self.held
                .lock()
                .unwrap()
                .insert((Account::new(token), Account::new(holder)), amount);
        }
    }

    impl BalanceReader for Balances {
        async fn balance_of(&self, token: &Account, holder: &Account) -> Result<u128, BoostError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(BoostError::Balance("node unavailable".to_owned()));
            }
            let held = self.held.lock().unwrap();
            Ok(held.get(&(token.clone(), holder.clone())).copied().unwrap_or(0))
        }
    }

    type Producer = BoostProducer<Balances, MemoryBoostSnapshotStore, MemoryBoostEventSink>;

    fn producer(rules: Vec<FlagRule>) -> Producer {
        BoostProducer::new(
            Balances::default(),
            MemoryBoostSnapshotStore::new(),
            MemoryBoostEventSink::new(),
            rules,
        )
        .unwrap()
    }

    fn hyperliquid() -> FlagRule {
        FlagRule::Bridged {
            flag: "hyperliquid".to_owned(),
            token: Account::new(USDC),
            recipient: Account::new(BRIDGE),
        }
    }

    fn transfer(token: &str, from: &str, to: &str, value: u128, at: u64) -> Transfer {
        Transfer {
            token: Account::new(token),
            from: Account::new(from),
            to: Account::new(to),
            value,
            timestamp_milli: TimestampMilli(at),
        }
    }

    #[tokio::test]
    async fn holding_flag_follows_balance_of_either_token() {
        let producer = producer(vec![FlagRule::dinero()]);
        producer.balances.hold(DINERO_PXETH, ALICE, 5);

        let changed = producer
            .on_transfer(&transfer(DINERO_PXETH, NULL, ALICE, 5, 1_000))
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].flags.contains("dinero"));
        assert_eq!(changed[0].timestamp_milli, TimestampMilli(1_000));

        // Moving pxETH out while holding apxETH keeps the flag on.
        producer.balances.hold(DINERO_PXETH, ALICE, 0);
        producer.balances.hold(DINERO_APXETH, ALICE, 1);
        let unchanged = producer
            .on_transfer(&transfer(DINERO_PXETH, ALICE, NULL, 5, 2_000))
            .await
            .unwrap();
        assert!(unchanged.is_empty());

        producer.balances.hold(DINERO_APXETH, ALICE, 0);
        let off = producer
            .on_transfer(&transfer(DINERO_APXETH, ALICE, NULL, 1, 3_000))
            .await
            .unwrap();
        assert!(off[0].flags.is_empty());

        let events = producer.events().events().await;
        assert_eq!(events.len(), 2);
        let stored = producer.snapshots().get(&Account::new(ALICE)).await.unwrap().unwrap();
        assert_eq!(stored.timestamp_milli, TimestampMilli(3_000));
    }

    #[tokio::test]
    async fn null_address_is_never_evaluated() {
        let producer = producer(vec![FlagRule::blueprint()]);
        producer.balances.hold(BLUEPRINT_COLLECTION, BOB, 1);
        let changed = producer
            .on_transfer(&transfer(BLUEPRINT_COLLECTION, NULL, BOB, 42, 1_000))
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].account, Account::new(BOB));
        assert_eq!(producer.balances.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bridge_deposit_sets_sticky_flag_on_both_sides() {
        let producer = producer(vec![hyperliquid()]);

        let ignored = producer
            .on_transfer(&transfer(USDC, ALICE, BOB, 10, 1_000))
            .await
            .unwrap();
        assert!(ignored.is_empty());
        let zero = producer
            .on_transfer(&transfer(USDC, ALICE, BRIDGE, 0, 1_000))
            .await
            .unwrap();
        assert!(zero.is_empty());

        let changed = producer
            .on_transfer(&transfer(USDC, ALICE, BRIDGE, 10, 2_000))
            .await
            .unwrap();
        let accounts: Vec<_> = changed.iter().map(|r| r.account.clone()).collect();
        assert_eq!(accounts, vec![Account::new(ALICE), Account::new(BRIDGE)]);

        let repeat = producer
            .on_transfer(&transfer(USDC, ALICE, BRIDGE, 10, 3_000))
            .await
            .unwrap();
        assert!(repeat.is_empty());
        assert_eq!(producer.balances.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flags_from_different_rules_share_one_record() {
        let producer = producer(vec![FlagRule::dinero(), FlagRule::blueprint()]);
        producer.balances.hold(BLUEPRINT_COLLECTION, ALICE, 1);
        producer
            .on_transfer(&transfer(BLUEPRINT_COLLECTION, BOB, ALICE, 7, 1_000))
            .await
            .unwrap();

        producer.balances.hold(DINERO_APXETH, ALICE, 3);
        let changed = producer
            .on_transfer(&transfer(DINERO_APXETH, NULL, ALICE, 3, 2_000))
            .await
            .unwrap();
        assert!(changed[0].flags.contains("dinero"));
        assert!(changed[0].flags.contains("blueprint"));
    }

    #[tokio::test]
    async fn failed_balance_read_stores_nothing() {
        let producer = producer(vec![FlagRule::dinero()]);
        producer.balances.failing.store(true, Ordering::SeqCst);
        let result = producer
            .on_transfer(&transfer(DINERO_PXETH, NULL, ALICE, 5, 1_000))
            .await;
        assert!(matches!(result, Err(BoostError::Balance(_))));
        assert!(producer.events().events().await.is_empty());
        assert_eq!(producer.snapshots().get(&Account::new(ALICE)).await.unwrap(), None);
    }

    #[test]
    fn rejects_duplicate_and_empty_rules() {
        assert!(validate_rules(&[FlagRule::dinero(), FlagRule::dinero()]).is_err());
        let empty = FlagRule::Holding {
            flag: "dinero".to_owned(),
            tokens: Vec::new(),
        };
        assert!(validate_rules(&[empty]).is_err());
        let all = [FlagRule::dinero(), FlagRule::blueprint(), hyperliquid()];
        assert!(validate_rules(&all).is_ok());
    }

    #[test]
    fn rule_parses_from_tagged_json() {
        let json = format!(
            r#"{{ "kind": "bridged", "flag": "hyperliquid",
                 "token": "{USDC}", "recipient": "{BRIDGE}" }}"#
        );
        let rule: FlagRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, hyperliquid());
    }

    #[test]
    fn self_transfer_has_one_party() {
        let t = transfer(USDC, ALICE, ALICE, 1, 0);
        assert_eq!(t.parties(), vec![&Account::new(ALICE)]);
    }
}
