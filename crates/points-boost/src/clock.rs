//! Wall-clock abstraction used for cache staleness.
//!
//! Staleness is measured in real time, independently of the evaluation
//! times passed to queries (which follow the chain's block timestamps).

use std::sync::atomic::{AtomicU64, Ordering};

use points_types::TimestampMilli;

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> TimestampMilli;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMilli {
        TimestampMilli::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub const fn new(start: TimestampMilli) -> Self {
        Self {
            millis: AtomicU64::new(start.0),
        }
    }

    /// Jump to `at`.
    pub fn set(&self, at: TimestampMilli) {
        self.millis.store(at.0, Ordering::Release);
    }

    /// Move forward by `millis`.
    pub fn advance(&self, millis: u64) {
        let _ = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(millis))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampMilli {
        TimestampMilli(self.millis.load(Ordering::Acquire))
    }
}
