//! Worker facade.
//!
//! Translates fetcher lifecycle events into scheduler operations and owns
//! the executor and its history pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::executor::{Executor, FETCH_TIMEOUT};
use crate::pool::Pool;
use crate::scheduler::{JobCallback, Scheduler};
use crate::storage::Storage;
use crate::{Fetcher, JobId, Result};

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Ceiling on a single fetch.
    pub fetch_timeout: Duration,
    /// How long `stop` waits for in-flight fetches.
    ///
    /// Should exceed `fetch_timeout`, otherwise a fetch that started just
    /// before shutdown may still be running when `stop` gives up.
    pub shutdown_grace: Duration,
    /// Idle history buffers kept for reuse.
    pub pool_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: FETCH_TIMEOUT,
            shutdown_grace: Duration::from_secs(30),
            pool_capacity: 64,
        }
    }
}

/// Entry point for scheduling fetchers.
pub struct Worker {
    scheduler: Scheduler,
    executor: Arc<Executor>,
    storage: Arc<dyn Storage>,
    shutdown_grace: Duration,
}

impl Worker {
    /// Create a worker and start its scheduler on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(storage: Arc<dyn Storage>, config: WorkerConfig) -> Result<Self> {
        if config.shutdown_grace <= config.fetch_timeout {
            warn!(
                shutdown_grace_secs = config.shutdown_grace.as_secs_f64(),
                fetch_timeout_secs = config.fetch_timeout.as_secs_f64(),
                "shutdown grace does not exceed fetch timeout"
            );
        }

        let pool = Pool::new(config.pool_capacity);
        let executor = Executor::new(Arc::clone(&storage), pool, config.fetch_timeout)?;

        Ok(Self {
            scheduler: Scheduler::start(),
            executor: Arc::new(executor),
            storage,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Start polling a fetcher and record the new job id on it.
    ///
    /// The caller is responsible for persisting the association.
    #[tracing::instrument(skip(self, fetcher), fields(fetcher_id = fetcher.id))]
    pub async fn register_job(&self, fetcher: &mut Fetcher) -> Result<JobId> {
        let id = self
            .scheduler
            .add(
                fetcher.id,
                fetcher.url.clone(),
                fetcher.interval_secs,
                self.callback(fetcher),
            )
            .await?;

        fetcher.job_id = Some(id);
        Ok(id)
    }

    /// Stop polling a job. Safe to call for jobs that no longer exist.
    ///
    /// A fetch already in flight for the job is not cancelled and may still
    /// record history after this returns.
    #[tracing::instrument(skip(self))]
    pub async fn deregister_job(&self, job_id: JobId) {
        self.scheduler.remove(job_id).await;
    }

    /// Replace the job for `fetcher` and record the new id on it.
    ///
    /// `old_job_id` is invalid afterwards; the caller must persist the new
    /// id.
    #[tracing::instrument(skip(self, fetcher), fields(fetcher_id = fetcher.id))]
    pub async fn update_job(&self, fetcher: &mut Fetcher, old_job_id: JobId) -> Result<JobId> {
        let id = self
            .scheduler
            .update(
                old_job_id,
                fetcher.id,
                fetcher.url.clone(),
                fetcher.interval_secs,
                self.callback(fetcher),
            )
            .await?;

        fetcher.job_id = Some(id);
        Ok(id)
    }

    /// Register every active fetcher from storage and store the job ids.
    ///
    /// Fetchers that fail to register are logged and skipped. Returns the
    /// number of jobs registered.
    pub async fn register_active(&self) -> Result<usize> {
        let fetchers = self.storage.list_active_fetchers().await?;
        let mut registered = 0;

        for mut fetcher in fetchers {
            let job_id = match self.register_job(&mut fetcher).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(fetcher_id = fetcher.id, error = %e, "skipping fetcher");
                    continue;
                }
            };
            registered += 1;

            if let Err(e) = self.storage.associate_job(fetcher.id, job_id).await {
                error!(fetcher_id = fetcher.id, job_id = %job_id, error = %e, "failed to store job id");
            }
        }

        info!(registered, "registered active fetchers");
        Ok(registered)
    }

    /// Stop firing jobs and wait for in-flight fetches to finish.
    ///
    /// Returns `false` if the shutdown grace ran out first.
    pub async fn stop(&self) -> bool {
        self.scheduler.stop().await;

        let tracker = self.scheduler.tracker();
        tracker.close();
        if !tracker.is_empty() {
            info!(in_flight = tracker.len(), "waiting for in-flight fetches");
        }

        match tokio::time::timeout(self.shutdown_grace, tracker.wait()).await {
            Ok(()) => {
                info!("worker stopped");
                true
            }
            Err(_) => {
                warn!(
                    in_flight = tracker.len(),
                    "shutdown grace elapsed with fetches still running"
                );
                false
            }
        }
    }

    fn callback(&self, fetcher: &Fetcher) -> JobCallback {
        let executor = Arc::clone(&self.executor);
        let url: Arc<str> = Arc::from(fetcher.url.as_str());
        let fetcher_id = fetcher.id;

        Arc::new(move || {
            let executor = Arc::clone(&executor);
            let url = Arc::clone(&url);
            Box::pin(async move {
                executor.run(&url, fetcher_id).await;
            })
        })
    }
}
