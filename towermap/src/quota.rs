//! Daily provider call budget.
//!
//! [`QuotaTracker`] wraps a [`QuotaStore`] with the configured daily limit
//! and the UTC calendar. It never reports an error: if the backing store
//! fails, the failure is logged and the quota is treated as exhausted, so a
//! broken counter can only stop calls, never allow extra ones.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::store::QuotaStore;

/// Quota state for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    /// UTC date the counter belongs to.
    pub date: NaiveDate,
    /// Calls recorded so far.
    pub calls: u32,
    /// Daily ceiling.
    pub limit: u32,
}

impl QuotaUsage {
    /// Calls left before the ceiling is reached.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.calls)
    }

    /// Whether at least one more call is allowed.
    pub fn can_call(&self) -> bool {
        self.calls < self.limit
    }
}

/// Current UTC date.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Tracks provider calls against a fixed daily ceiling.
#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn QuotaStore>,
    limit: u32,
}

impl QuotaTracker {
    /// Create a tracker over `store` allowing `limit` calls per UTC day.
    pub fn new(store: Arc<dyn QuotaStore>, limit: u32) -> Self {
        Self { store, limit }
    }

    /// The daily ceiling.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Whether today's counter is below the limit.
    pub fn can_call(&self) -> bool {
        self.can_call_on(today())
    }

    /// Whether the counter for `date` is below the limit.
    pub fn can_call_on(&self, date: NaiveDate) -> bool {
        self.usage_on(date).can_call()
    }

    /// Record one call today and return the new count.
    pub fn record_call(&self) -> u32 {
        self.record_call_on(today())
    }

    /// Record one call on `date` and return the new count.
    ///
    /// On store failure the limit is returned, so callers see the quota as spent.
    pub fn record_call_on(&self, date: NaiveDate) -> u32 {
        match self.store.increment(date) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(%date, error = %e, "Failed to record provider call");
                self.limit
            }
        }
    }

    /// Atomically check the limit and record a call today.
    ///
    /// Returns the new count, or `None` when no quota is left.
    pub fn try_acquire(&self) -> Option<u32> {
        self.try_acquire_on(today())
    }

    /// Atomically check the limit and record a call on `date`.
    pub fn try_acquire_on(&self, date: NaiveDate) -> Option<u32> {
        match self.store.try_increment(date, self.limit) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(%date, error = %e, "Failed to acquire provider quota");
                None
            }
        }
    }

    /// Today's usage.
    pub fn usage(&self) -> QuotaUsage {
        self.usage_on(today())
    }

    /// Usage for `date`. A store failure reads as a spent quota.
    pub fn usage_on(&self, date: NaiveDate) -> QuotaUsage {
        let calls = match self.store.calls_on(date) {
            Ok(calls) => calls,
            Err(e) => {
                tracing::warn!(%date, error = %e, "Failed to read provider quota");
                self.limit
            }
        };
        QuotaUsage {
            date,
            calls,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, TowerError};
    use crate::store::MemoryStore;
    use std::thread;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()
    }

    struct BrokenStore;

    impl QuotaStore for BrokenStore {
        fn calls_on(&self, _: NaiveDate) -> Result<u32> {
            Err(TowerError::Store {
                reason: "offline".into(),
            })
        }
        fn increment(&self, _: NaiveDate) -> Result<u32> {
            Err(TowerError::Store {
                reason: "offline".into(),
            })
        }
        fn try_increment(&self, _: NaiveDate, _: u32) -> Result<Option<u32>> {
            Err(TowerError::Store {
                reason: "offline".into(),
            })
        }
    }

    #[test]
    fn test_can_call_until_limit() {
        let tracker = QuotaTracker::new(Arc::new(MemoryStore::new()), 2);

        assert!(tracker.can_call_on(day()));
        assert_eq!(tracker.record_call_on(day()), 1);
        assert!(tracker.can_call_on(day()));
        assert_eq!(tracker.record_call_on(day()), 2);
        assert!(!tracker.can_call_on(day()));
    }

    #[test]
    fn test_new_day_starts_at_zero() {
        let tracker = QuotaTracker::new(Arc::new(MemoryStore::new()), 1);
        tracker.record_call_on(day());
        assert!(!tracker.can_call_on(day()));

        let tomorrow = day().succ_opt().unwrap();
        assert!(tracker.can_call_on(tomorrow));
        assert_eq!(tracker.usage_on(tomorrow).calls, 0);
    }

    #[test]
    fn test_try_acquire_stops_at_limit() {
        let tracker = QuotaTracker::new(Arc::new(MemoryStore::new()), 3);
        assert_eq!(tracker.try_acquire_on(day()), Some(1));
        assert_eq!(tracker.try_acquire_on(day()), Some(2));
        assert_eq!(tracker.try_acquire_on(day()), Some(3));
        assert_eq!(tracker.try_acquire_on(day()), None);
        assert_eq!(tracker.usage_on(day()).calls, 3);
    }

    #[test]
    fn test_zero_limit_never_allows() {
        let tracker = QuotaTracker::new(Arc::new(MemoryStore::new()), 0);
        assert!(!tracker.can_call_on(day()));
        assert_eq!(tracker.try_acquire_on(day()), None);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let tracker = QuotaTracker::new(Arc::new(MemoryStore::new()), 50);

        let granted: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..20)
                            .filter(|_| tracker.try_acquire_on(day()).is_some())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(granted, 50);
        assert_eq!(tracker.usage_on(day()).calls, 50);
    }

    #[test]
    fn test_usage_remaining() {
        let tracker = QuotaTracker::new(Arc::new(MemoryStore::new()), 10);
        tracker.record_call_on(day());
        let usage = tracker.usage_on(day());
        assert_eq!(usage.remaining(), 9);
        assert_eq!(usage.limit, 10);
        assert_eq!(usage.date, day());
    }

    #[test]
    fn test_store_failure_fails_closed() {
        let tracker = QuotaTracker::new(Arc::new(BrokenStore), 10);
        assert!(!tracker.can_call_on(day()));
        assert_eq!(tracker.try_acquire_on(day()), None);
        assert_eq!(tracker.record_call_on(day()), 10);
        assert_eq!(tracker.usage_on(day()).remaining(), 0);
    }
}
