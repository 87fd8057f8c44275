//! Graceful shutdown: one cancellation token for every background task, then
//! a bounded wait for tasks and in-flight dispatches.

use std::time::Duration;

use hub_scheduler::DispatchPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the process-wide shutdown token and the handles it stops.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Token background tasks watch for cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Join `handle` on shutdown.
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Cancel the token, then wait up to `timeout` for tracked tasks and
    /// for the dispatch pool to drain.
    ///
    /// Returns `false` if anything was still running at the deadline.
    pub async fn graceful_shutdown(self, pool: &DispatchPool, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.token.cancel();
        info!(
            task_count = self.handles.len(),
            pending_dispatches = pool.pending_count(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let tasks = futures::future::join_all(self.handles);
        let drain = async {
            let _ = tasks.await;
            pool.drain().await;
        };
        let clean = tokio::time::timeout(timeout, drain).await.is_ok();
        if !clean {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
        clean
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.token().is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_cancels_tracked_tasks() {
        let mut coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
        }));
        let observer = coord.token();

        assert!(coord.graceful_shutdown(&DispatchPool::new(), None).await);
        assert!(observer.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_waits_for_dispatches() {
        let pool = DispatchPool::new();
        pool.spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        assert!(ShutdownCoordinator::new().graceful_shutdown(&pool, None).await);
        assert_eq!(pool.pending_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_times_out() {
        let mut coord = ShutdownCoordinator::new();
        // ignores cancellation
        coord.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));

        let clean = coord
            .graceful_shutdown(&DispatchPool::new(), Some(Duration::from_millis(50)))
            .await;
        assert!(!clean);
    }
}
