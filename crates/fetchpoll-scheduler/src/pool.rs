//! Bounded pool of reusable values.
//!
//! Values are checked out as [`Pooled`] guards and go back to the pool when
//! the guard drops. The pool resets every value on the way back in, so a
//! caller can never see data left over from a previous checkout.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use tracing::warn;

/// A value that can be returned to its zero state.
pub trait Reset {
    /// Clear every field back to its default.
    fn reset(&mut self);

    /// Whether the value is in its zero state.
    fn is_reset(&self) -> bool;
}

/// Lock-free pool of idle values, safe to share between tasks.
pub struct Pool<T> {
    idle: ArrayQueue<T>,
}

impl<T: Reset + Default> Pool<T> {
    /// Create a pool holding at most `capacity` idle values.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: ArrayQueue::new(capacity.max(1)),
        })
    }

    /// Check out a value in its zero state.
    pub fn get(self: &Arc<Self>) -> Pooled<T> {
        let value = match self.idle.pop() {
            Some(mut value) => {
                if !value.is_reset() {
                    warn!("pooled value was not reset on return, resetting");
                    value.reset();
                }
                value
            }
            None => T::default(),
        };

        Pooled {
            value,
            pool: Arc::clone(self),
        }
    }

    /// Number of idle values ready for reuse.
    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    pub fn capacity(&self) -> usize {
        self.idle.capacity()
    }

    fn put(&self, mut value: T) {
        value.reset();
        // A full pool just lets the value drop.
        let _ = self.idle.push(value);
    }
}

/// A value checked out of a [`Pool`].
pub struct Pooled<T: Reset + Default> {
    value: T,
    pool: Arc<Pool<T>>,
}

impl<T: Reset + Default> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Reset + Default> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Reset + Default> Drop for Pooled<T> {
    fn drop(&mut self) {
        let value = std::mem::take(&mut self.value);
        self.pool.put(value);
    }
}

impl<T: Reset + Default + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistoryRecord;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn dirty(record: &mut HistoryRecord) {
        record.fetcher_id = 42;
        record.response = Some("body".to_string());
        record.duration_secs = 3.5;
        record.created_at = Utc::now();
    }

    #[test]
    fn test_get_from_empty_pool_is_default() {
        let pool = Pool::<HistoryRecord>::new(4);
        assert_eq!(pool.idle(), 0);

        let record = pool.get();
        assert_eq!(*record, HistoryRecord::default());
    }

    #[test]
    fn test_drop_returns_reset_value() {
        let pool = Pool::<HistoryRecord>::new(4);

        {
            let mut record = pool.get();
            dirty(&mut record);
        }
        assert_eq!(pool.idle(), 1);

        let record = pool.get();
        assert_eq!(pool.idle(), 0);
        assert_eq!(*record, HistoryRecord::default());
    }

    #[test]
    fn test_capacity_bounds_idle_values() {
        let pool = Pool::<HistoryRecord>::new(2);

        let guards: Vec<_> = (0..5).map(|_| pool.get()).collect();
        drop(guards);

        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_zero_capacity_still_usable() {
        let pool = Pool::<HistoryRecord>::new(0);
        drop(pool.get());
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkout() {
        let pool = Pool::<HistoryRecord>::new(8);

        let mut handles = Vec::new();
        for i in 0..64 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let mut record = pool.get();
                assert!(record.is_reset());
                record.fetcher_id = i;
                record.response = Some(format!("body {i}"));
                tokio::task::yield_now().await;
                assert_eq!(record.fetcher_id, i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(pool.idle() <= 8);
        for _ in 0..pool.idle() {
            assert!(pool.get().is_reset());
        }
    }

    proptest! {
        // Whatever a caller writes, the next checkout starts clean.
        #[test]
        fn reuse_never_leaks(
            fetcher_id in any::<i64>(),
            response in proptest::option::of(".{0,64}"),
            duration in 0.0f64..5.0,
        ) {
            let pool = Pool::<HistoryRecord>::new(1);
            {
                let mut record = pool.get();
                record.fetcher_id = fetcher_id;
                record.response = response;
                record.duration_secs = duration;
                record.created_at = Utc::now();
            }

            let record = pool.get();
            prop_assert_eq!(&*record, &HistoryRecord::default());
        }
    }
}
