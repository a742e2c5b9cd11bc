//! Fixed-interval schedules.
//!
//! Fetchers only ever run "every N seconds", so this is the whole schedule
//! language. Fire times stay on the grid laid down by the first fire: a job
//! registered at `t0` with interval `n` fires at `t0 + n`, `t0 + 2n`, ...
//!
//! When the tick loop falls behind by more than one period, the missed
//! slots are skipped rather than replayed. A late job fires once and then
//! resumes at the next grid point after `now`.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::{Result, SchedulerError};

/// Longest accepted interval: one year.
///
/// Fire times are computed with `Instant` arithmetic, which panics on
/// overflow, so intervals are bounded well below that.
pub const MAX_INTERVAL_SECS: i64 = 365 * 24 * 60 * 60;

/// An "every N seconds" trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Every {
    secs: u64,
}

impl Every {
    /// Build a schedule from a user-supplied interval.
    ///
    /// Accepts `1..=MAX_INTERVAL_SECS`.
    pub fn seconds(interval_secs: i64) -> Result<Self> {
        if !(1..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            return Err(SchedulerError::InvalidSchedule { interval_secs });
        }
        Ok(Self {
            secs: interval_secs.unsigned_abs(),
        })
    }

    pub fn as_secs(&self) -> u64 {
        self.secs
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    /// First fire time for a job registered at `now`.
    pub fn first_after(&self, now: Instant) -> Instant {
        now + self.period()
    }

    /// Next fire time after the slot at `prev` fired at `now`.
    pub fn advance(&self, prev: Instant, now: Instant) -> Instant {
        let next = prev + self.period();
        if next > now {
            return next;
        }

        let behind = now.duration_since(next).as_secs();
        let skipped = behind / self.secs + 1;
        next + Duration::from_secs(skipped.saturating_mul(self.secs))
    }
}

impl fmt::Display for Every {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@every {}s", self.secs)
    }
}
