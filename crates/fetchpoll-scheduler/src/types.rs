//! Scheduler types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::pool::Reset;
use crate::schedule::Every;
use crate::{Result, SchedulerError};

/// Identifier of a live job in the scheduler.
///
/// Ids are allocated from a monotonically increasing counter and are never
/// handed out twice by the same scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-configured URL to poll on a fixed interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fetcher {
    pub id: i64,
    pub url: String,
    /// Polling interval in seconds.
    #[serde(rename = "interval")]
    pub interval_secs: i64,
    /// Job currently driving this fetcher, if registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl Fetcher {
    pub fn new(id: i64, url: impl Into<String>, interval_secs: i64) -> Self {
        Self {
            id,
            url: url.into(),
            interval_secs,
            job_id: None,
        }
    }

    /// Check the descriptor before it is stored or scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(SchedulerError::InvalidUrl {
                url: self.url.clone(),
                reason: "url can't be empty".to_string(),
            });
        }

        if let Err(e) = reqwest::Url::parse(&self.url) {
            return Err(SchedulerError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            });
        }

        Every::seconds(self.interval_secs)?;
        Ok(())
    }
}

/// Snapshot of a job entry held by the scheduler.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub fetcher_id: i64,
    pub url: String,
    pub every: Every,
    /// When this job should next fire.
    pub next_run: Instant,
}

impl Job {
    /// Create a job whose first fire is one interval after `now`.
    pub fn new(id: JobId, fetcher_id: i64, url: String, every: Every, now: Instant) -> Self {
        Self {
            id,
            fetcher_id,
            url,
            every,
            next_run: every.first_after(now),
        }
    }

    /// Check if this job is due to fire at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_run <= now
    }

    /// Move `next_run` forward after a fire at `now`.
    pub fn advance(&mut self, now: Instant) {
        self.next_run = self.every.advance(self.next_run, now);
    }
}

/// Outcome of one fetch attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(skip)]
    pub fetcher_id: i64,
    /// Response body, absent when the request or body read failed.
    pub response: Option<String>,
    /// Request duration in seconds, never above the fetch timeout.
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
}

impl Reset for HistoryRecord {
    fn reset(&mut self) {
        self.fetcher_id = 0;
        self.response = None;
        self.duration_secs = 0.0;
        self.created_at = DateTime::<Utc>::default();
    }

    fn is_reset(&self) -> bool {
        *self == Self::default()
    }
}
