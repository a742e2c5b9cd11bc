//! Persistence collaborator interface.
//!
//! The scheduler never owns storage; it reads the active fetcher set and
//! writes history records through [`Storage`]. Implementations must accept
//! concurrent calls from many in-flight fetches.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Fetcher, HistoryRecord, JobId, Result, SchedulerError};

/// Storage operations the scheduler depends on.
#[async_trait]
pub trait Storage: Send + Sync {
    /// All fetchers that should currently be polled.
    async fn list_active_fetchers(&self) -> Result<Vec<Fetcher>>;

    /// Persist the outcome of one fetch attempt.
    async fn record_history(&self, entry: &HistoryRecord) -> Result<()>;

    /// Remember which job drives a fetcher.
    async fn associate_job(&self, fetcher_id: i64, job_id: JobId) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    fetchers: BTreeMap<i64, Fetcher>,
    history: HashMap<i64, Vec<HistoryRecord>>,
}

/// In-memory [`Storage`], for tests and embedding.
///
/// Deleting a fetcher keeps its history, so rows written by a fetch that
/// was already in flight at deletion time stay visible.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with fetchers.
    pub fn with_fetchers(fetchers: impl IntoIterator<Item = Fetcher>) -> Self {
        let state = MemoryState {
            fetchers: fetchers.into_iter().map(|f| (f.id, f)).collect(),
            history: HashMap::new(),
        };
        Self {
            state: RwLock::new(state),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub async fn add_fetcher(&self, fetcher: Fetcher) {
        self.state.write().await.fetchers.insert(fetcher.id, fetcher);
    }

    /// Remove a fetcher. Its history is left in place.
    pub async fn delete_fetcher(&self, fetcher_id: i64) -> Option<Fetcher> {
        self.state.write().await.fetchers.remove(&fetcher_id)
    }

    pub async fn fetcher(&self, fetcher_id: i64) -> Option<Fetcher> {
        self.state.read().await.fetchers.get(&fetcher_id).cloned()
    }

    /// Job id last associated with a fetcher.
    pub async fn job_for(&self, fetcher_id: i64) -> Option<JobId> {
        self.state
            .read()
            .await
            .fetchers
            .get(&fetcher_id)
            .and_then(|f| f.job_id)
    }

    /// History of one fetcher, oldest first.
    pub async fn history(&self, fetcher_id: i64) -> Vec<HistoryRecord> {
        self.state
            .read()
            .await
            .history
            .get(&fetcher_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of history records across all fetchers.
    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.values().map(Vec::len).sum()
    }

    /// Make every subsequent write fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SchedulerError::Persistence("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn list_active_fetchers(&self) -> Result<Vec<Fetcher>> {
        Ok(self.state.read().await.fetchers.values().cloned().collect())
    }

    async fn record_history(&self, entry: &HistoryRecord) -> Result<()> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .history
            .entry(entry.fetcher_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn associate_job(&self, fetcher_id: i64, job_id: JobId) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let fetcher = state
            .fetchers
            .get_mut(&fetcher_id)
            .ok_or_else(|| SchedulerError::Persistence(format!("fetcher {fetcher_id} not found")))?;
        fetcher.job_id = Some(job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(fetcher_id: i64, body: &str) -> HistoryRecord {
        HistoryRecord {
            fetcher_id,
            response: Some(body.to_string()),
            duration_secs: 0.1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_list_active_fetchers_sorted_by_id() {
        let store = MemoryStore::with_fetchers([
            Fetcher::new(2, "http://b.test/", 10),
            Fetcher::new(1, "http://a.test/", 5),
        ]);

        let ids: Vec<_> = store
            .list_active_fetchers()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_record_history_per_fetcher() {
        let store = MemoryStore::new();
        store.record_history(&record(1, "a")).await.unwrap();
        store.record_history(&record(1, "b")).await.unwrap();
        store.record_history(&record(2, "c")).await.unwrap();

        let history = store.history(1).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].response.as_deref(), Some("b"));
        assert_eq!(store.history_len().await, 3);
    }

    #[tokio::test]
    async fn test_delete_fetcher_keeps_history() {
        let store = MemoryStore::with_fetchers([Fetcher::new(1, "http://a.test/", 5)]);
        store.record_history(&record(1, "a")).await.unwrap();

        assert!(store.delete_fetcher(1).await.is_some());
        assert!(store.fetcher(1).await.is_none());
        assert_eq!(store.history(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_associate_job() {
        let store = MemoryStore::with_fetchers([Fetcher::new(1, "http://a.test/", 5)]);
        store.associate_job(1, JobId(7)).await.unwrap();
        assert_eq!(store.job_for(1).await, Some(JobId(7)));

        let err = store.associate_job(99, JobId(8)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.record_history(&record(1, "a")).await.is_err());

        store.set_fail_writes(false);
        assert!(store.record_history(&record(1, "a")).await.is_ok());
    }
}
