//! fetchpoll: polls HTTP endpoints on fixed intervals.
//!
//! Main binary with subcommands:
//! - `run`: load fetchers, poll them, append history until Ctrl-C

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod store;

#[derive(Parser)]
#[command(name = "fetchpoll")]
#[command(about = "Polls HTTP endpoints on fixed intervals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured fetchers until interrupted
    Run {
        /// JSON file with fetcher descriptors
        #[arg(long, env = "FETCHPOLL_FETCHERS", default_value = "fetchers.json")]
        fetchers: PathBuf,

        /// JSON-lines file history records are appended to
        #[arg(long, env = "FETCHPOLL_HISTORY", default_value = "history.jsonl")]
        history: PathBuf,

        /// Per-fetch timeout in seconds
        #[arg(long, env = "FETCHPOLL_FETCH_TIMEOUT", default_value = "5")]
        fetch_timeout: u64,

        /// Seconds to wait for in-flight fetches on shutdown
        #[arg(long, env = "FETCHPOLL_SHUTDOWN_GRACE", default_value = "30")]
        shutdown_grace: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "fetchpoll=info,fetchpoll_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            fetchers,
            history,
            fetch_timeout,
            shutdown_grace,
        } => {
            daemon::run(daemon::DaemonConfig {
                fetchers_path: fetchers,
                history_path: history,
                fetch_timeout: std::time::Duration::from_secs(fetch_timeout),
                shutdown_grace: std::time::Duration::from_secs(shutdown_grace),
            })
            .await
        }
    }
}
