//! Fetch execution: one bounded HTTP GET, one history record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::{Client, Url};
use tracing::{debug, error, warn};

use crate::pool::Pool;
use crate::storage::Storage;
use crate::{HistoryRecord, Result};

/// Default ceiling on a single fetch, body read included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs fetches and records their outcome.
pub struct Executor {
    http: Client,
    storage: Arc<dyn Storage>,
    pool: Arc<Pool<HistoryRecord>>,
    timeout: Duration,
}

impl Executor {
    /// Create an executor whose fetches are cut off after `timeout`.
    pub fn new(
        storage: Arc<dyn Storage>,
        pool: Arc<Pool<HistoryRecord>>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            storage,
            pool,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool(&self) -> &Arc<Pool<HistoryRecord>> {
        &self.pool
    }

    /// Fetch `url` once and record the outcome for `fetcher_id`.
    ///
    /// Never fails: transport and persistence errors are logged. A URL that
    /// does not parse is a configuration defect and records nothing.
    ///
    /// A response whose body cannot be read in full records no response.
    /// Bodies are decoded as UTF-8 with invalid sequences replaced by
    /// U+FFFD, so a non-UTF-8 body is stored lossily.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, url: &str, fetcher_id: i64) {
        // Returned to the pool when dropped, on every path below.
        let mut history = self.pool.get();

        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                error!(fetcher_id, url, error = %e, "invalid fetch url, skipping");
                return;
            }
        };

        let created_at = Utc::now();
        let start = Instant::now();

        match tokio::time::timeout(self.timeout, self.fetch(url)).await {
            Ok(Ok(body)) => history.response = Some(body),
            Ok(Err(e)) => warn!(fetcher_id, error = %e, "fetch failed"),
            Err(_) => warn!(
                fetcher_id,
                timeout_secs = self.timeout.as_secs_f64(),
                "fetch timed out"
            ),
        }

        history.duration_secs = clamp_duration(start.elapsed(), self.timeout);
        history.fetcher_id = fetcher_id;
        history.created_at = created_at;

        debug!(
            fetcher_id,
            duration_secs = history.duration_secs,
            has_response = history.response.is_some(),
            "fetch finished"
        );

        if let Err(e) = self.storage.record_history(&history).await {
            error!(fetcher_id, error = %e, "failed to record history");
        }
    }

    async fn fetch(&self, url: Url) -> Result<String> {
        let response = self.http.get(url).send().await?;
        Ok(response.text().await?)
    }
}

/// Seconds to record for a fetch that took `elapsed`.
///
/// A fetch that ran into the deadline records the deadline itself, not the
/// wall-clock time it took the cancellation to be observed.
fn clamp_duration(elapsed: Duration, timeout: Duration) -> f64 {
    if elapsed >= timeout {
        timeout.as_secs_f64()
    } else {
        elapsed.as_secs_f64()
    }
}
