//! Wall-clock source for the login stamp.
//!
//! Inactivity and warning timers run on tokio time; only the session-start
//! stamp (which must survive a restart) is measured against a `Clock`.
//! `ManualClock` is anchored to tokio's `Instant`, so a paused runtime moves
//! both together, and it can additionally be skewed to simulate a reload after
//! a long absence.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

#[derive(Debug)]
pub struct ManualClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
    skew: Mutex<chrono::Duration>,
}

impl ManualClock {
    /// Start at `base`; call from inside the runtime whose clock should drive it.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self { base, origin: tokio::time::Instant::now(), skew: Mutex::new(chrono::Duration::zero()) }
    }

    /// Jump wall time forward without touching tokio time.
    pub fn skew_by(&self, by: std::time::Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *self.skew.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.origin);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());
        self.base + elapsed + *self.skew.lock()
    }
}
