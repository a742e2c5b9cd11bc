//! Error types for the scheduler.

use thiserror::Error;

use crate::JobId;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Interval is not positive or exceeds the longest supported interval.
    #[error("invalid schedule: interval must be between 1 and {max} seconds, got {interval_secs}", max = crate::schedule::MAX_INTERVAL_SECS)]
    InvalidSchedule { interval_secs: i64 },

    /// Fetcher URL is empty or not an absolute URL.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The fetcher already has a live job.
    #[error("fetcher {fetcher_id} already scheduled as job {job_id}")]
    JobExists { fetcher_id: i64, job_id: JobId },

    /// HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Persistence collaborator rejected a write or read.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// I/O error from a storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;
