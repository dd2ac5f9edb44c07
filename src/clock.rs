//! Injectable time source.
//!
//! Date buckets ("due today", "this week") and audit stamps all read the
//! current instant through a `Clock` so services can be driven from a fixed
//! point in tests.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day of `now()`, in UTC.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to an explicit instant. Cloned handles share the same time.
#[derive(Debug, Clone)]
pub struct FixedClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(instant)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.current.lock();
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_shared_between_clones() {
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2024, 3, 9, 23, 30, 0).unwrap());
        let other = clock.clone();
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(other.today(), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
    }
}
