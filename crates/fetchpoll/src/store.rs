//! File-backed storage.
//!
//! Fetchers are read once from a JSON array. History is appended to a
//! JSON-lines file, one record per line. Job associations live in memory
//! only, since job ids do not survive a restart.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use fetchpoll_scheduler::{Fetcher, HistoryRecord, JobId, Result, SchedulerError, Storage};

/// One line of the history file.
#[derive(Serialize)]
struct HistoryLine<'a> {
    fetcher_id: i64,
    #[serde(flatten)]
    record: &'a HistoryRecord,
}

pub struct FileStore {
    fetchers: RwLock<BTreeMap<i64, Fetcher>>,
    history: Mutex<File>,
}

impl FileStore {
    /// Load fetchers and open the history file for appending.
    ///
    /// Fetchers that fail validation are logged and left out.
    pub async fn open(fetchers_path: &Path, history_path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(fetchers_path).await?;
        let loaded: Vec<Fetcher> = serde_json::from_str(&raw)?;

        let mut fetchers = BTreeMap::new();
        for fetcher in loaded {
            if let Err(e) = fetcher.validate() {
                warn!(fetcher_id = fetcher.id, error = %e, "ignoring invalid fetcher");
                continue;
            }
            let fetcher_id = fetcher.id;
            if fetchers.insert(fetcher_id, fetcher).is_some() {
                warn!(fetcher_id, "duplicate fetcher id, keeping the last one");
            }
        }
        info!(count = fetchers.len(), "loaded fetchers");

        let history = OpenOptions::new()
            .create(true)
            .append(true)
            .open(history_path)
            .await?;

        Ok(Self {
            fetchers: RwLock::new(fetchers),
            history: Mutex::new(history),
        })
    }
}

#[async_trait]
impl Storage for FileStore {
    async fn list_active_fetchers(&self) -> Result<Vec<Fetcher>> {
        Ok(self.fetchers.read().await.values().cloned().collect())
    }

    async fn record_history(&self, entry: &HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&HistoryLine {
            fetcher_id: entry.fetcher_id,
            record: entry,
        })?;
        line.push(b'\n');

        let mut file = self.history.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn associate_job(&self, fetcher_id: i64, job_id: JobId) -> Result<()> {
        let mut fetchers = self.fetchers.write().await;
        let fetcher = fetchers
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
    use tempfile::TempDir;

    async fn store_with(fetchers_json: &str) -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let fetchers_path = dir.path().join("fetchers.json");
        tokio::fs::write(&fetchers_path, fetchers_json).await.unwrap();

        let store = FileStore::open(&fetchers_path, &dir.path().join("history.jsonl"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_skips_invalid_fetchers() {
        let (_dir, store) = store_with(
            r#"[
                {"id": 1, "url": "http://a.test/", "interval": 5},
                {"id": 2, "url": "", "interval": 5},
                {"id": 3, "url": "http://c.test/", "interval": 0},
                {"id": 4, "url": "http://d.test/", "interval": 60}
            ]"#,
        )
        .await;

        let ids: Vec<_> = store
            .list_active_fetchers()
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = FileStore::open(
            &dir.path().join("missing.json"),
            &dir.path().join("history.jsonl"),
        )
        .await;
        assert!(matches!(result, Err(SchedulerError::Io(_))));
    }

    #[tokio::test]
    async fn test_open_malformed_json_fails() {
        let dir = TempDir::new().unwrap();
        let fetchers_path = dir.path().join("fetchers.json");
        tokio::fs::write(&fetchers_path, "{not json").await.unwrap();

        let result = FileStore::open(&fetchers_path, &dir.path().join("history.jsonl")).await;
        assert!(matches!(result, Err(SchedulerError::Json(_))));
    }

    #[tokio::test]
    async fn test_record_history_appends_lines() {
        let (dir, store) = store_with("[]").await;

        store
            .record_history(&HistoryRecord {
                fetcher_id: 1,
                response: Some("ok".to_string()),
                duration_secs: 0.25,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .record_history(&HistoryRecord {
                fetcher_id: 2,
                response: None,
                duration_secs: 5.0,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("history.jsonl"))
            .await
            .unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["fetcher_id"], 1);
        assert_eq!(lines[0]["response"], "ok");
        assert_eq!(lines[0]["duration"], 0.25);
        assert_eq!(lines[1]["fetcher_id"], 2);
        assert!(lines[1]["response"].is_null());
        assert!(lines[1]["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_associate_job() {
        let (_dir, store) =
            store_with(r#"[{"id": 1, "url": "http://a.test/", "interval": 5}]"#).await;

        store.associate_job(1, JobId(3)).await.unwrap();
        let fetchers = store.list_active_fetchers().await.unwrap();
        assert_eq!(fetchers[0].job_id, Some(JobId(3)));

        assert!(store.associate_job(9, JobId(4)).await.is_err());
    }
}
