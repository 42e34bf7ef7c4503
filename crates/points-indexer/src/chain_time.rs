//! High-water mark of observed chain time.
//!
//! Reconciliation passes are stamped with the newest trigger timestamp
//! seen, not the wall clock, so accrual never runs ahead of the chain the
//! holdings are read from. Heartbeat triggers without entities exist to
//! move this mark through quiet periods.

use points_types::TimestampMilli;

/// Newest trigger time observed so far.
#[derive(Debug, Default)]
pub struct ChainTime {
    latest: Option<TimestampMilli>,
}

impl ChainTime {
    /// Record a trigger timestamp. Returns whether the mark advanced;
    /// older timestamps leave it in place.
    pub fn observe(&mut self, at: TimestampMilli) -> bool {
        let advanced = self.latest.is_none_or(|latest| at > latest);
        if advanced {
            self.latest = Some(at);
        }
        advanced
    }

    /// The newest observed time, or `None` before the first trigger.
    pub const fn latest(&self) -> Option<TimestampMilli> {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_observed_means_no_reconcile_time() {
        assert_eq!(ChainTime::default().latest(), None);
    }

    #[test]
    fn mark_only_moves_forward() {
        let mut time = ChainTime::default();
        assert!(time.observe(TimestampMilli(1_000)));
        assert!(time.observe(TimestampMilli(2_000)));
        assert!(!time.observe(TimestampMilli(1_500)));
        assert!(!time.observe(TimestampMilli(2_000)));
        assert_eq!(time.latest(), Some(TimestampMilli(2_000)));
    }
}
