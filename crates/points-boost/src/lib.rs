//! Boost lookup and multiplier policy.
//!
//! [`BoostStore`] caches per-account boost history fetched from a paginated
//! [`BoostSource`] and answers point-in-time queries against it.
//! [`MultiplierPolicy`] turns the record in effect into the multiplier the
//! accrual engine applies. [`BoostProducer`] derives the boost records
//! themselves from token transfers.

pub mod clock;
pub mod error;
pub mod policy;
pub mod producer;
pub mod source;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::BoostError;
pub use policy::{
    AppliedBoost, BoostWeight, Cutover, MultiplierPolicy, PolicyShape, SEASON_ONE_CUTOVER,
};
pub use producer::{
    BOOST_EVENT, BOOST_TARGET, BalanceReader, BoostEventSink, BoostProducer, BoostSnapshotStore,
    FlagRule, MemoryBoostEventSink, MemoryBoostSnapshotStore, TracingBoostEventSink, Transfer,
    update_flag, validate_rules,
};
pub use source::{
    API_KEY_ENV, BoostRow, BoostSource, EndpointStyle, HttpBoostSource, StaticBoostSource,
};
pub use store::{
    BoostStore, BoostStoreConfig, BoostTable, DEFAULT_PAGE_SIZE, DEFAULT_REFRESH_INTERVAL_MS,
    DEFAULT_REFRESH_TIMEOUT_MS, LookupMode, RefreshFailurePolicy,
};
