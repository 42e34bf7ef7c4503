//! Cached, periodically refreshed boost lookup.
//!
//! The store owns an immutable [`BoostTable`] behind an `Arc`. A refresh
//! builds a complete new table off to the side and swaps the pointer, so a
//! reader holding the old `Arc` keeps a consistent view until it is done.
//! Refreshes are serialized by a mutex and the staleness check is repeated
//! after acquiring it, which makes concurrent stale queries share one fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use points_types::{Account, BoostRecord, NO_OWNER, TimestampMilli};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::clock::Clock;
use crate::error::BoostError;
use crate::policy::{AppliedBoost, MultiplierPolicy};
use crate::source::{BoostRow, BoostSource};

/// Default time between refreshes: 10 minutes.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// Default bound on one complete refresh: 2 minutes.
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 2 * 60 * 1000;

/// Default number of rows requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which lookup a deployment uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    /// Keep every record per account and answer point-in-time queries.
    #[default]
    History,
    /// Keep only the latest record per account; query times are ignored.
    LatestOnly,
}

/// What a query does when the table is stale and refreshing it fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshFailurePolicy {
    /// Propagate the refresh error to the query.
    #[default]
    FailFast,
    /// Keep answering from the last good table while it is younger than
    /// `max_staleness_ms`, then propagate.
    ServeStale {
        /// Hard bound on the age of a table served after a failed refresh.
        max_staleness_ms: u64,
    },
}

/// Tuning for a [`BoostStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostStoreConfig {
    /// Lookup variant.
    #[serde(default)]
    pub mode: LookupMode,
    /// A table older than this is refreshed before answering.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// A refresh that has not finished after this long is abandoned and
    /// counts as failed.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Rows requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Behavior on refresh failure.
    #[serde(default)]
    pub failure_policy: RefreshFailurePolicy,
}

const fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

const fn default_refresh_timeout_ms() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_MS
}

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for BoostStoreConfig {
    fn default() -> Self {
        Self {
            mode: LookupMode::default(),
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
            page_size: DEFAULT_PAGE_SIZE,
            failure_policy: RefreshFailurePolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// BoostTable
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Entries {
    History(HashMap<Account, Vec<BoostRecord>>),
    Latest(HashMap<Account, BoostRecord>),
}

/// One complete, immutable generation of boost data.
#[derive(Debug)]
pub struct BoostTable {
    entries: Entries,
    rows: usize,
}

impl BoostTable {
    /// A table with no records.
    pub fn empty(mode: LookupMode) -> Self {
        Self::from_rows(mode, Vec::new())
    }

    /// Build a table from source rows in any order.
    ///
    /// Rows without a timestamp count as active since the epoch. In history
    /// mode each account's records are sorted by timestamp; rows with equal
    /// timestamps keep their source order. In latest-only mode the last row
    /// seen per account wins.
    pub fn from_rows(mode: LookupMode, rows: Vec<BoostRow>) -> Self {
        let count = rows.len();
        let records = rows.into_iter().map(|row| {
            BoostRecord::new(
                row.account,
                row.timestamp_milli.unwrap_or(TimestampMilli::EPOCH),
                row.flags,
            )
        });
        let entries = match mode {
            LookupMode::History => {
                let mut by_account: HashMap<Account, Vec<BoostRecord>> = HashMap::new();
                for record in records {
                    by_account.entry(record.account.clone()).or_default().push(record);
                }
                for series in by_account.values_mut() {
                    series.sort_by_key(|r| r.timestamp_milli);
                }
                Entries::History(by_account)
            }
            LookupMode::LatestOnly => Entries::Latest(
                records.map(|r| (r.account.clone(), r)).collect(),
            ),
        };
        Self {
            entries,
            rows: count,
        }
    }

    /// The record in effect for `account` at `at`.
    ///
    /// Unknown accounts, and times before an account's first record, get
    /// the all-false default stamped with `at`.
    pub fn lookup(&self, account: &Account, at: TimestampMilli) -> BoostRecord {
        let found = match &self.entries {
            Entries::History(by_account) => by_account.get(account).and_then(|series| {
                let after = series.partition_point(|r| r.timestamp_milli <= at);
                after.checked_sub(1).and_then(|idx| series.get(idx))
            }),
            Entries::Latest(by_account) => by_account.get(account),
        };
        found.cloned().unwrap_or_else(|| BoostRecord::inactive(account.clone(), at))
    }

    /// Number of accounts with at least one record.
    pub fn account_count(&self) -> usize {
        match &self.entries {
            Entries::History(m) => m.len(),
            Entries::Latest(m) => m.len(),
        }
    }

    /// Number of source rows the table was built from.
    pub const fn row_count(&self) -> usize {
        self.rows
    }
}

// ---------------------------------------------------------------------------
// BoostStore
// ---------------------------------------------------------------------------

struct Cached {
    table: Arc<BoostTable>,
    refreshed_at: Option<TimestampMilli>,
    /// Set by a failed refresh, cleared by the next successful one.
    last_failed_at: Option<TimestampMilli>,
}

/// Process-wide boost cache. Construct once and share by `Arc`.
pub struct BoostStore<S> {
    source: S,
    config: BoostStoreConfig,
    clock: Arc<dyn Clock>,
    cached: RwLock<Cached>,
    refresh_lock: Mutex<()>,
}

impl<S: BoostSource> BoostStore<S> {
    /// Create an empty store. Nothing is fetched until [`Self::init`],
    /// [`Self::refresh`], or the first query.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::Policy`] if the page size or refresh timeout
    /// is zero.
    pub fn new(
        source: S,
        config: BoostStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BoostError> {
        if config.page_size == 0 {
            return Err(BoostError::Policy("boost page size must be positive".to_owned()));
        }
        if config.refresh_timeout_ms == 0 {
            return Err(BoostError::Policy(
                "boost refresh timeout must be positive".to_owned(),
            ));
        }
        Ok(Self {
            source,
            config,
            clock,
            cached: RwLock::new(Cached {
                table: Arc::new(BoostTable::empty(config.mode)),
                refreshed_at: None,
                last_failed_at: None,
            }),
            refresh_lock: Mutex::new(()),
        })
    }

    /// The store configuration.
    pub const fn config(&self) -> &BoostStoreConfig {
        &self.config
    }

    /// Perform the first refresh. Startup calls this so a missing credential
    /// or unreachable source stops the process instead of silently serving
    /// defaults.
    ///
    /// # Errors
    ///
    /// Propagates the refresh error.
    pub async fn init(&self) -> Result<(), BoostError> {
        self.refresh().await?;
        tracing::info!(
            accounts = self.account_count().await,
            mode = ?self.config.mode,
            "boost store initialized"
        );
        Ok(())
    }

    /// Fetch a fresh table and swap it in, regardless of staleness.
    ///
    /// On failure the current table is left untouched.
    ///
    /// # Errors
    ///
    /// Propagates source errors, or [`BoostError::Timeout`] when the
    /// refresh outlives `refresh_timeout_ms`.
    pub async fn refresh(&self) -> Result<(), BoostError> {
        let _guard = self.refresh_lock.lock().await;
        self.bounded_refresh().await.map(|_| ())
    }

    /// The boost record in effect for `account` at `at`, refreshing first
    /// if the table is stale.
    ///
    /// # Errors
    ///
    /// Returns the refresh error when the table is stale, refreshing fails,
    /// and the failure policy does not allow serving the old table.
    pub async fn boosts_at(
        &self,
        account: &Account,
        at: TimestampMilli,
    ) -> Result<BoostRecord, BoostError> {
        let table = self.current_table().await?;
        Ok(table.lookup(account, at))
    }

    /// The boost record and multiplier for `account` at `at` under `policy`.
    ///
    /// An absent account (an unowned position) gets the default record
    /// without touching the cache.
    ///
    /// # Errors
    ///
    /// Same as [`Self::boosts_at`].
    pub async fn multiplier_at(
        &self,
        account: Option<&Account>,
        at: TimestampMilli,
        policy: &MultiplierPolicy,
    ) -> Result<AppliedBoost, BoostError> {
        let record = match account {
            Some(account) => self.boosts_at(account, at).await?,
            None => BoostRecord::inactive(Account::new(NO_OWNER), at),
        };
        Ok(policy.apply(record, at))
    }

    /// Wall-clock time of the last successful refresh.
    pub async fn last_refreshed(&self) -> Option<TimestampMilli> {
        self.cached.read().await.refreshed_at
    }

    /// Number of accounts in the current table.
    pub async fn account_count(&self) -> usize {
        self.cached.read().await.table.account_count()
    }

    async fn current_table(&self) -> Result<Arc<BoostTable>, BoostError> {
        if let Some(table) = self.fresh_table().await {
            return Ok(table);
        }

        if let Some(table) = self.stale_within_backoff().await {
            return Ok(table);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed, or failed to, while we waited.
        if let Some(table) = self.fresh_table().await {
            return Ok(table);
        }
        if let Some(table) = self.stale_within_backoff().await {
            return Ok(table);
        }

        match self.bounded_refresh().await {
            Ok(table) => Ok(table),
            Err(err) => self.after_failed_refresh(err).await,
        }
    }

    async fn fresh_table(&self) -> Option<Arc<BoostTable>> {
        let now = self.clock.now();
        let cached = self.cached.read().await;
        let refreshed_at = cached.refreshed_at?;
        let age = now.as_u64().saturating_sub(refreshed_at.as_u64());
        (age < self.config.refresh_interval_ms).then(|| Arc::clone(&cached.table))
    }

    /// Under `ServeStale`, the last good table while a recent refresh
    /// failure is younger than `refresh_interval_ms` and the table is still
    /// inside the staleness bound. Queries in that window skip the source.
    async fn stale_within_backoff(&self) -> Option<Arc<BoostTable>> {
        let RefreshFailurePolicy::ServeStale { max_staleness_ms } = self.config.failure_policy
        else {
            return None;
        };
        let now = self.clock.now().as_u64();
        let cached = self.cached.read().await;
        let refreshed_at = cached.refreshed_at?.as_u64();
        let failed_at = cached.last_failed_at?.as_u64();
        let since_failure = now.saturating_sub(failed_at);
        let age = now.saturating_sub(refreshed_at);
        (since_failure < self.config.refresh_interval_ms && age < max_staleness_ms)
            .then(|| Arc::clone(&cached.table))
    }

    /// [`Self::load_and_swap`] under `refresh_timeout_ms`, recording the
    /// failure time when it does not succeed. Callers hold `refresh_lock`.
    async fn bounded_refresh(&self) -> Result<Arc<BoostTable>, BoostError> {
        let after_ms = self.config.refresh_timeout_ms;
        let outcome =
            match tokio::time::timeout(Duration::from_millis(after_ms), self.load_and_swap()).await
            {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(BoostError::Timeout { after_ms }),
            };
        if outcome.is_err() {
            self.cached.write().await.last_failed_at = Some(self.clock.now());
        }
        outcome
    }

    async fn after_failed_refresh(&self, err: BoostError) -> Result<Arc<BoostTable>, BoostError> {
        let RefreshFailurePolicy::ServeStale { max_staleness_ms } = self.config.failure_policy
        else {
            return Err(err);
        };
        let now = self.clock.now();
        let cached = self.cached.read().await;
        let Some(refreshed_at) = cached.refreshed_at else {
            return Err(err);
        };
        let age_ms = now.as_u64().saturating_sub(refreshed_at.as_u64());
        if age_ms < max_staleness_ms {
            tracing::warn!(age_ms, error = %err, "boost refresh failed, serving stale table");
            Ok(Arc::clone(&cached.table))
        } else {
            Err(BoostError::Stale {
                age_ms,
                source: Box::new(err),
            })
        }
    }

    /// Page through the source, build a table, and swap it in. Callers hold
    /// `refresh_lock`.
    async fn load_and_swap(&self) -> Result<Arc<BoostTable>, BoostError> {
        let started = self.clock.now();
        let page_size = self.config.page_size;
        let mut rows = Vec::new();
        let mut offset = 0_usize;
        loop {
            let page = self.source.fetch_page(offset, page_size, started).await?;
            let fetched = page.len();
            rows.extend(page);
            tracing::debug!(offset, fetched, "fetched boost page");
            if fetched < page_size {
                break;
            }
            offset = offset.saturating_add(page_size);
        }

        let table = Arc::new(BoostTable::from_rows(self.config.mode, rows));
        tracing::info!(
            rows = table.row_count(),
            accounts = table.account_count(),
            "boost table refreshed"
        );

        let mut cached = self.cached.write().await;
        cached.table = Arc::clone(&table);
        cached.refreshed_at = Some(self.clock.now());
        cached.last_failed_at = None;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use points_types::BoostFlags;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::clock::ManualClock;

    fn row(account: &str, at: Option<u64>, flags: &[&str]) -> BoostRow {
        BoostRow {
            account: Account::new(account),
            timestamp_milli: at.map(TimestampMilli),
            flags: flags.iter().copied().collect::<BoostFlags>(),
        }
    }

    /// Serves fixed rows, counts fetches, and tracks concurrent fetches.
    #[derive(Default)]
    struct CountingSource {
        rows: Vec<BoostRow>,
        delay: Option<Duration>,
        failing: AtomicBool,
        hanging: AtomicBool,
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl CountingSource {
        fn new(rows: Vec<BoostRow>) -> Self {
            Self {
                rows,
                ..Self::default()
            }
        }
    }

    impl BoostSource for CountingSource {
        async fn fetch_page(
            &self,
            offset: usize,
            limit: usize,
            _as_of: TimestampMilli,
        ) -> Result<Vec<BoostRow>, BoostError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.hanging.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(BoostError::Http("source unavailable".to_owned()));
            }
            Ok(self.rows.iter().skip(offset).take(limit).cloned().collect())
        }
    }

    fn store(
        source: CountingSource,
        config: BoostStoreConfig,
    ) -> (BoostStore<CountingSource>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(TimestampMilli(1_000_000)));
        let store = BoostStore::new(source, config, clock.clone()).unwrap();
        (store, clock)
    }

    fn shuffled_history() -> Vec<BoostRow> {
        vec![
            row("0xA", Some(300), &["dinero", "blueprint"]),
            row("0xa", Some(100), &["dinero"]),
            row("0xA", Some(200), &[]),
            row("0xB", Some(50), &["blueprint"]),
        ]
    }

    #[test]
    fn history_lookup_finds_rightmost_record_at_or_before() {
        let table = BoostTable::from_rows(LookupMode::History, shuffled_history());
        let a = Account::new("0xa");

        let at = |t: u64| table.lookup(&a, TimestampMilli(t));
        assert_eq!(at(100).timestamp_milli, TimestampMilli(100));
        assert!(at(100).flags.contains("dinero"));
        assert_eq!(at(150).timestamp_milli, TimestampMilli(100));
        assert_eq!(at(200).timestamp_milli, TimestampMilli(200));
        assert!(at(250).flags.is_empty());
        assert_eq!(at(300).timestamp_milli, TimestampMilli(300));
        assert!(at(u64::MAX).flags.contains("blueprint"));
        assert_eq!(table.account_count(), 2);
        assert_eq!(table.row_count(), 4);
    }

    #[test]
    fn history_lookup_defaults_before_first_record() {
        let table = BoostTable::from_rows(LookupMode::History, shuffled_history());
        let early = table.lookup(&Account::new("0xA"), TimestampMilli(99));
        assert!(early.flags.is_empty());
        assert_eq!(early.timestamp_milli, TimestampMilli(99));
        assert_eq!(early.account, Account::new("0xa"));
    }

    #[test]
    fn unknown_account_gets_default() {
        let table = BoostTable::from_rows(LookupMode::History, shuffled_history());
        let record = table.lookup(&Account::new("0xc"), TimestampMilli(500));
        assert!(record.flags.is_empty());

        let latest = BoostTable::from_rows(LookupMode::LatestOnly, shuffled_history());
        assert!(latest.lookup(&Account::new("0xc"), TimestampMilli(500)).flags.is_empty());
    }

    #[test]
    fn latest_only_keeps_last_row_and_ignores_time() {
        let rows = vec![
            row("0xA", None, &["dinero"]),
            row("0xa", None, &["blueprint"]),
        ];
        let table = BoostTable::from_rows(LookupMode::LatestOnly, rows);
        let record = table.lookup(&Account::new("0xA"), TimestampMilli(1));
        assert!(record.flags.contains("blueprint"));
        assert!(!record.flags.contains("dinero"));
        assert_eq!(record.timestamp_milli, TimestampMilli::EPOCH);
        assert_eq!(table.account_count(), 1);
    }

    #[test]
    fn untimestamped_history_rows_are_active_from_epoch() {
        let table = BoostTable::from_rows(LookupMode::History, vec![row("0xa", None, &["dinero"])]);
        assert!(table.lookup(&Account::new("0xa"), TimestampMilli(0)).flags.contains("dinero"));
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let rows: Vec<BoostRow> = (0..7_u64)
            .map(|i| row(&format!("0x{i:040x}"), Some(i), &["dinero"]))
            .collect();
        let config = BoostStoreConfig {
            page_size: 3,
            ..BoostStoreConfig::default()
        };
        let (store, _clock) = store(CountingSource::new(rows), config);
        store.init().await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(store.account_count().await, 7);
    }

    #[tokio::test]
    async fn exact_multiple_fetches_trailing_empty_page() {
        let rows: Vec<BoostRow> = (0..6_u64)
            .map(|i| row(&format!("0x{i:040x}"), Some(i), &[]))
            .collect();
        let config = BoostStoreConfig {
            page_size: 3,
            ..BoostStoreConfig::default()
        };
        let (store, _clock) = store(CountingSource::new(rows), config);
        store.refresh().await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(store.account_count().await, 6);
    }

    #[tokio::test]
    async fn refreshes_only_when_stale() {
        let source = CountingSource::new(shuffled_history());
        let (store, clock) = store(source, BoostStoreConfig::default());
        let a = Account::new("0xa");

        assert_eq!(store.last_refreshed().await, None);
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.last_refreshed().await, Some(TimestampMilli(1_000_000)));

        clock.advance(DEFAULT_REFRESH_INTERVAL_MS - 1);
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 1);

        clock.advance(1);
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stale_queries_share_one_refresh() {
        let source = CountingSource {
            rows: shuffled_history(),
            delay: Some(Duration::from_millis(50)),
            ..CountingSource::default()
        };
        let (store, _clock) = store(source, BoostStoreConfig::default());
        let store = Arc::new(store);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.boosts_at(&Account::new("0xa"), TimestampMilli(300)).await
                })
            })
            .collect();
        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert!(record.flags.contains("blueprint"));
        }

        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fail_fast_propagates_refresh_errors() {
        let source = CountingSource::new(shuffled_history());
        let (store, clock) = store(source, BoostStoreConfig::default());
        store.init().await.unwrap();

        store.source.failing.store(true, Ordering::SeqCst);
        clock.advance(DEFAULT_REFRESH_INTERVAL_MS);
        let err = store.boosts_at(&Account::new("0xa"), TimestampMilli(150)).await;
        assert!(matches!(err, Err(BoostError::Http(_))));
    }

    #[tokio::test]
    async fn serve_stale_until_hard_bound() {
        let config = BoostStoreConfig {
            failure_policy: RefreshFailurePolicy::ServeStale {
                max_staleness_ms: 2 * DEFAULT_REFRESH_INTERVAL_MS,
            },
            ..BoostStoreConfig::default()
        };
        let (store, clock) = store(CountingSource::new(shuffled_history()), config);
        let a = Account::new("0xa");
        store.init().await.unwrap();
        store.source.failing.store(true, Ordering::SeqCst);

        clock.advance(DEFAULT_REFRESH_INTERVAL_MS);
        let record = store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert!(record.flags.contains("dinero"));

        clock.advance(DEFAULT_REFRESH_INTERVAL_MS);
        let err = store.boosts_at(&a, TimestampMilli(150)).await;
        assert!(matches!(err, Err(BoostError::Stale { .. })));

        store.source.failing.store(false, Ordering::SeqCst);
        assert!(store.boosts_at(&a, TimestampMilli(150)).await.is_ok());
    }

    #[tokio::test]
    async fn failed_refresh_backs_off_while_serving_stale() {
        let config = BoostStoreConfig {
            failure_policy: RefreshFailurePolicy::ServeStale {
                max_staleness_ms: u64::MAX,
            },
            ..BoostStoreConfig::default()
        };
        let (store, clock) = store(CountingSource::new(shuffled_history()), config);
        let a = Account::new("0xa");
        store.init().await.unwrap();
        store.source.failing.store(true, Ordering::SeqCst);
        clock.advance(DEFAULT_REFRESH_INTERVAL_MS);

        for _ in 0..50 {
            let record = store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
            assert!(record.flags.contains("dinero"));
        }
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 2);

        clock.advance(DEFAULT_REFRESH_INTERVAL_MS - 1);
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 2);

        clock.advance(1);
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 3);

        store.source.failing.store(false, Ordering::SeqCst);
        clock.advance(DEFAULT_REFRESH_INTERVAL_MS);
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert_eq!(store.source.fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_refresh_times_out_and_serves_stale() {
        let config = BoostStoreConfig {
            refresh_timeout_ms: 5_000,
            failure_policy: RefreshFailurePolicy::ServeStale {
                max_staleness_ms: 2 * DEFAULT_REFRESH_INTERVAL_MS,
            },
            ..BoostStoreConfig::default()
        };
        let (store, clock) = store(CountingSource::new(shuffled_history()), config);
        let a = Account::new("0xa");
        store.init().await.unwrap();
        store.source.hanging.store(true, Ordering::SeqCst);

        clock.advance(DEFAULT_REFRESH_INTERVAL_MS);
        let record = store.boosts_at(&a, TimestampMilli(150)).await.unwrap();
        assert!(record.flags.contains("dinero"));

        let err = store.refresh().await;
        assert!(matches!(err, Err(BoostError::Timeout { after_ms: 5_000 })));
        assert_eq!(store.account_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_refresh_fails_fast_with_timeout() {
        let config = BoostStoreConfig {
            refresh_timeout_ms: 1_000,
            ..BoostStoreConfig::default()
        };
        let (store, _clock) = store(CountingSource::new(shuffled_history()), config);
        store.source.hanging.store(true, Ordering::SeqCst);
        let err = store.boosts_at(&Account::new("0xa"), TimestampMilli(150)).await;
        assert!(matches!(err, Err(BoostError::Timeout { after_ms: 1_000 })));
    }

    #[tokio::test]
    async fn serve_stale_without_any_table_fails() {
        let config = BoostStoreConfig {
            failure_policy: RefreshFailurePolicy::ServeStale {
                max_staleness_ms: u64::MAX,
            },
            ..BoostStoreConfig::default()
        };
        let (store, _clock) = store(CountingSource::new(Vec::new()), config);
        store.source.failing.store(true, Ordering::SeqCst);
        let err = store.boosts_at(&Account::new("0xa"), TimestampMilli(0)).await;
        assert!(matches!(err, Err(BoostError::Http(_))));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_table() {
        let source = CountingSource::new(shuffled_history());
        let (store, _clock) = store(source, BoostStoreConfig::default());
        store.refresh().await.unwrap();
        store.source.failing.store(true, Ordering::SeqCst);
        assert!(store.refresh().await.is_err());
        assert_eq!(store.account_count().await, 2);
    }

    #[tokio::test]
    async fn multiplier_for_boosted_and_unowned() {
        let source = CountingSource::new(shuffled_history());
        let (store, _clock) = store(source, BoostStoreConfig::default());
        let policy = MultiplierPolicy::doubling();

        let applied = store
            .multiplier_at(Some(&Account::new("0xa")), TimestampMilli(300), &policy)
            .await
            .unwrap();
        assert_eq!(applied.multiplier, dec!(4));

        let unowned = store.multiplier_at(None, TimestampMilli(300), &policy).await.unwrap();
        assert_eq!(unowned.multiplier, dec!(1));
        assert_eq!(unowned.record.account.as_str(), NO_OWNER);
    }

    #[test]
    fn rejects_zero_page_size() {
        let config = BoostStoreConfig {
            page_size: 0,
            ..BoostStoreConfig::default()
        };
        let clock = Arc::new(ManualClock::default());
        assert!(BoostStore::new(CountingSource::default(), config, clock).is_err());
    }

    #[test]
    fn rejects_zero_refresh_timeout() {
        let config = BoostStoreConfig {
            refresh_timeout_ms: 0,
            ..BoostStoreConfig::default()
        };
        let clock = Arc::new(ManualClock::default());
        assert!(BoostStore::new(CountingSource::default(), config, clock).is_err());
    }

    #[test]
    fn config_parses_failure_policy() {
        let config: BoostStoreConfig = serde_json::from_str(
            r#"{ "mode": "latest_only",
                 "failure_policy": { "kind": "serve_stale", "max_staleness_ms": 3600000 } }"#,
        )
        .unwrap();
        assert_eq!(config.mode, LookupMode::LatestOnly);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.refresh_timeout_ms, DEFAULT_REFRESH_TIMEOUT_MS);
        assert_eq!(
            config.failure_policy,
            RefreshFailurePolicy::ServeStale {
                max_staleness_ms: 3_600_000
            }
        );
    }
}
