//! Interval scheduler and fetch pipeline for fetchpoll.
//!
//! This crate provides:
//! - A job registry that fires each fetcher on its own fixed interval
//!   while jobs are added, updated and removed concurrently
//! - An executor that performs one bounded HTTP GET per fire and records
//!   exactly one history entry for it
//! - A pool of reusable history buffers
//! - The [`Worker`] facade that ties them together and shuts down cleanly
//!
//! Storage is supplied by the caller through the [`Storage`] trait.

mod error;
pub mod executor;
pub mod pool;
pub mod schedule;
pub mod scheduler;
pub mod storage;
mod types;
pub mod worker;

pub use error::{Result, SchedulerError};
pub use executor::{Executor, FETCH_TIMEOUT};
pub use pool::{Pool, Pooled, Reset};
pub use schedule::{Every, MAX_INTERVAL_SECS};
pub use scheduler::{JobCallback, Scheduler};
pub use storage::{MemoryStore, Storage};
pub use types::{Fetcher, HistoryRecord, Job, JobId};
pub use worker::{Worker, WorkerConfig};
