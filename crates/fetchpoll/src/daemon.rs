//! Daemon mode: register the configured fetchers and poll until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tracing::{info, warn};

use fetchpoll_scheduler::{Storage, Worker, WorkerConfig};

use crate::store::FileStore;

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub fetchers_path: PathBuf,
    pub history_path: PathBuf,
    pub fetch_timeout: Duration,
    pub shutdown_grace: Duration,
}

/// Run the daemon.
pub async fn run(config: DaemonConfig) -> Result<()> {
    info!(
        fetchers = %config.fetchers_path.display(),
        history = %config.history_path.display(),
        "starting fetchpoll"
    );

    let store = FileStore::open(&config.fetchers_path, &config.history_path)
        .await
        .map_err(|e| miette::miette!("failed to open store: {}", e))?;
    let storage: Arc<dyn Storage> = Arc::new(store);

    let worker = Worker::new(
        storage,
        WorkerConfig {
            fetch_timeout: config.fetch_timeout,
            shutdown_grace: config.shutdown_grace,
            ..WorkerConfig::default()
        },
    )
    .map_err(|e| miette::miette!("failed to start worker: {}", e))?;

    let registered = worker
        .register_active()
        .await
        .map_err(|e| miette::miette!("failed to load fetchers: {}", e))?;
    if registered == 0 {
        warn!("no fetchers registered, nothing to poll");
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for shutdown signal: {}", e))?;
    info!("received shutdown signal");

    if !worker.stop().await {
        warn!("exiting with fetches still in flight");
    }

    info!("fetchpoll shut down gracefully");
    Ok(())
}
