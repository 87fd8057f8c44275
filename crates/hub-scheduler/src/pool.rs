//! Tracked executor for dispatch jobs.
//!
//! Jobs run as tokio tasks registered in a [`JoinSet`] so shutdown can wait
//! for in-flight dispatches (and their compensation) to finish.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::warn;

/// Executor that owns every dispatch job. Cheap to clone.
#[derive(Clone, Default)]
pub struct DispatchPool {
    tasks: Arc<Mutex<JoinSet<()>>>,
    pending: Arc<AtomicUsize>,
}

impl DispatchPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` on the runtime as a tracked task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.pending.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard(Arc::clone(&self.pending));

        let mut tasks = self.tasks.lock();
        // reap finished jobs so the set does not grow without bound
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }
        let _ = tasks.spawn(async move {
            let _pending = guard;
            job.await;
        });
    }

    /// Wait for every job spawned so far.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            log_join_error(result);
        }
    }

    /// Wait for every job, giving up after `timeout`.
    ///
    /// Returns `true` if all jobs completed. Jobs still running at the
    /// deadline are aborted.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain()).await.is_ok()
    }

    /// Jobs spawned but not yet finished.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// Decrements the pending count however the job ends.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "dispatch job panicked");
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn new_pool_is_empty() {
        let pool = DispatchPool::new();
        assert_eq!(pool.pending_count(), 0);
        assert!(pool.drain_with_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn drain_waits_for_jobs() {
        let pool = DispatchPool::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pool.pending_count(), 5);

        pool.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.pending_count(), 0);
    }

    #[tokio::test]
    async fn drain_with_timeout_aborts_stuck_jobs() {
        let pool = DispatchPool::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        pool.spawn(async move {
            tokio::time::sleep(Duration::from_secs(300)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!pool.drain_with_timeout(Duration::from_millis(50)).await);
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_job_is_contained() {
        let pool = DispatchPool::new();
        pool.spawn(async { panic!("boom") });
        pool.drain().await;
        assert_eq!(pool.pending_count(), 0);
    }
}
