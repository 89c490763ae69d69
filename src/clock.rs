//! Wall clock abstraction
//!
//! All timestamps are epoch milliseconds. The engine reads time through
//! [`Clock`] so tests can pin and advance it.

use std::sync::atomic::{AtomicI64, Ordering};

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance_millis(minutes * 60_000);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Whole minutes elapsed between `since` and `now`, rounded to the nearest
/// minute. Clock skew that puts `since` in the future yields zero.
pub fn minutes_between(since: i64, now: i64) -> i64 {
    let elapsed = now.saturating_sub(since).max(0);
    (elapsed as f64 / MILLIS_PER_MINUTE).round() as i64
}
