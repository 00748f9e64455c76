//! Time source used for age computation.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a preset instant, for deterministic age tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Whole elapsed hours between `then` and `now`, truncated toward zero.
/// Negative when `then` lies in the future.
pub fn whole_hours_since(now: DateTime<Utc>, then: DateTime<Utc>) -> i64 {
    (now - then).num_hours()
}
