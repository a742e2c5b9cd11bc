//! Job registry and tick loop.
//!
//! The job table lives behind a single mutex. `add`, `remove`, `update` and
//! each pass of the tick loop take that lock, so the loop never sees a
//! half-written entry. Due jobs are advanced under the lock and their
//! callbacks are spawned onto a [`TaskTracker`]; the loop never waits for a
//! callback to finish.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::schedule::Every;
use crate::{Job, JobId, Result, SchedulerError};

/// Longest the loop sleeps without re-checking the table.
const MAX_SLEEP_SECS: u64 = 60;

/// Work to run each time a job fires.
pub type JobCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Entry {
    job: Job,
    callback: JobCallback,
}

#[derive(Default)]
struct JobTable {
    entries: BTreeMap<JobId, Entry>,
    by_fetcher: HashMap<i64, JobId>,
    last_id: u64,
}

impl JobTable {
    fn insert(
        &mut self,
        fetcher_id: i64,
        url: String,
        every: Every,
        callback: JobCallback,
        now: Instant,
    ) -> Result<JobId> {
        if let Some(&job_id) = self.by_fetcher.get(&fetcher_id) {
            return Err(SchedulerError::JobExists { fetcher_id, job_id });
        }

        self.last_id += 1;
        let id = JobId(self.last_id);
        let job = Job::new(id, fetcher_id, url, every, now);
        self.by_fetcher.insert(fetcher_id, id);
        self.entries.insert(id, Entry { job, callback });
        Ok(id)
    }

    /// Swap `old` for a fresh entry, or change nothing on error.
    fn replace(
        &mut self,
        old: JobId,
        fetcher_id: i64,
        url: String,
        every: Every,
        callback: JobCallback,
        now: Instant,
    ) -> Result<JobId> {
        if let Some(&job_id) = self.by_fetcher.get(&fetcher_id) {
            if job_id != old {
                return Err(SchedulerError::JobExists { fetcher_id, job_id });
            }
        }

        self.remove(old);
        self.insert(fetcher_id, url, every, callback, now)
    }

    fn remove(&mut self, job_id: JobId) -> Option<Job> {
        let entry = self.entries.remove(&job_id)?;
        self.by_fetcher.remove(&entry.job.fetcher_id);
        Some(entry.job)
    }

    fn next_run(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.job.next_run).min()
    }
}

struct Shared {
    table: Mutex<JobTable>,
    wake: Notify,
    tracker: TaskTracker,
}

impl Shared {
    /// Fire every due job and return the earliest upcoming fire time.
    async fn fire_due(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut table = self.table.lock().await;

        for entry in table.entries.values_mut() {
            if !entry.job.is_due(now) {
                continue;
            }

            entry.job.advance(now);
            debug!(
                job_id = %entry.job.id,
                fetcher_id = entry.job.fetcher_id,
                "firing job"
            );
            self.dispatch(entry.job.id, Arc::clone(&entry.callback));
        }

        table.next_run()
    }

    fn dispatch(&self, job_id: JobId, callback: JobCallback) {
        self.tracker.spawn(async move {
            let run = AssertUnwindSafe(async move { callback().await });
            if run.catch_unwind().await.is_err() {
                error!(job_id = %job_id, "job callback panicked");
            }
        });
    }
}

/// The job registry.
pub struct Scheduler {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler and spawn its tick loop on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start() -> Self {
        let shared = Arc::new(Shared {
            table: Mutex::new(JobTable::default()),
            wake: Notify::new(),
            tracker: TaskTracker::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::clone(&shared), shutdown_rx));

        Self {
            shared,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Register a job that runs `callback` every `interval_secs` seconds.
    ///
    /// The first fire is one interval from now.
    pub async fn add(
        &self,
        fetcher_id: i64,
        url: impl Into<String>,
        interval_secs: i64,
        callback: JobCallback,
    ) -> Result<JobId> {
        let every = Every::seconds(interval_secs)?;
        let url = url.into();

        let id = {
            let mut table = self.shared.table.lock().await;
            table.insert(fetcher_id, url.clone(), every, callback, Instant::now())?
        };
        self.shared.wake.notify_one();

        info!(job_id = %id, fetcher_id, %url, schedule = %every, "job added");
        Ok(id)
    }

    /// Remove a job. Unknown ids are ignored.
    pub async fn remove(&self, job_id: JobId) {
        let removed = self.shared.table.lock().await.remove(job_id);
        match removed {
            Some(job) => info!(job_id = %job_id, fetcher_id = job.fetcher_id, "job removed"),
            None => debug!(job_id = %job_id, "remove of unknown job ignored"),
        }
    }

    /// Replace a job with a new one and return the new id.
    ///
    /// The old id stops being valid and the interval phase restarts from
    /// now. On error the old job is left in place.
    pub async fn update(
        &self,
        job_id: JobId,
        fetcher_id: i64,
        url: impl Into<String>,
        interval_secs: i64,
        callback: JobCallback,
    ) -> Result<JobId> {
        let every = Every::seconds(interval_secs)?;
        let url = url.into();

        let id = {
            let mut table = self.shared.table.lock().await;
            table.replace(job_id, fetcher_id, url.clone(), every, callback, Instant::now())?
        };
        self.shared.wake.notify_one();

        info!(old_job_id = %job_id, job_id = %id, fetcher_id, %url, schedule = %every, "job updated");
        Ok(id)
    }

    /// Snapshot of a job, if it is registered.
    pub async fn get(&self, job_id: JobId) -> Option<Job> {
        let table = self.shared.table.lock().await;
        table.entries.get(&job_id).map(|e| e.job.clone())
    }

    /// Snapshot of all jobs, ordered by id.
    pub async fn jobs(&self) -> Vec<Job> {
        let table = self.shared.table.lock().await;
        table.entries.values().map(|e| e.job.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.shared.table.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Tracker holding every fired callback that is still running.
    pub fn tracker(&self) -> &TaskTracker {
        &self.shared.tracker
    }

    /// Stop the tick loop and wait for it to exit.
    ///
    /// Callbacks that already fired keep running.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler loop exited abnormally");
        }
    }
}

/// The tick loop.
async fn run(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    info!("scheduler starting");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let cap = Instant::now() + Duration::from_secs(MAX_SLEEP_SECS);
        let wake_at = match shared.fire_due().await {
            Some(next) => next.min(cap),
            None => cap,
        };

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.wake.notified() => {}
            _ = sleep_until(wake_at) => {}
        }
    }

    info!("scheduler shut down");
}
