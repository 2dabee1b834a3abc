//! # Clock
//!
//! Quote expiry and invoice overdue checks depend on "now". The engine never
//! reads the wall clock itself; callers hand it a [`Clock`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::RwLock;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC calendar date. Due dates and validity dates compare against this.
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

/// A settable clock for deterministic tests and replays.
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use keystone_core::clock::{Clock, FixedClock};
///
/// let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
/// clock.advance(Duration::days(31));
/// assert_eq!(clock.today().to_string(), "2026-04-01");
/// ```
#[derive(Debug)]
pub struct FixedClock {
    time: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        FixedClock {
            time: RwLock::new(time),
        }
    }

    /// Moves the clock to `time`.
    pub fn set(&self, time: DateTime<Utc>) {
        let mut guard = self.time.write().unwrap_or_else(|e| e.into_inner());
        *guard = time;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.time.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(|e| e.into_inner())
    }
}
