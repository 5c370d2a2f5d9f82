//! Time source abstraction.
//!
//! Everything that reasons about "now" (cache expiry, counter rollover, job
//! scheduling) takes a [`Clock`] so tests can drive time by hand.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Midnight (00:00 UTC) of the day containing `at`.
pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Midnight (00:00 UTC) of the first day of the month containing `at`.
pub fn start_of_month(at: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::Datelike;
    let day = at.date_naive().with_day(1).unwrap_or_else(|| at.date_naive());
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Midnight (00:00 UTC) of the first day of the month after the one containing `at`.
pub fn start_of_next_month(at: DateTime<Utc>) -> DateTime<Utc> {
    // Day 1 plus 32 days always lands in the following month
    start_of_month(start_of_month(at) + Duration::days(32))
}

/// Time remaining until the next 00:00 UTC, never less than one second.
pub fn until_next_midnight(at: DateTime<Utc>) -> std::time::Duration {
    let next = start_of_day(at) + Duration::days(1);
    (next - at)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
        .max(std::time::Duration::from_secs(1))
}
