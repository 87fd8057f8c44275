//! Stale-execution recovery.
//!
//! A run is stale when it is `executing` and neither its last worker event
//! nor its start time is newer than `now - timeout`. Each stale run is failed
//! and its session freed in one transaction. A system audit row follows on a
//! best-effort basis; subscribers then get an `error` followed by a
//! synthetic `done`.

use std::time::Duration;

use hub_core::{ExecutionId, TraceId, time};
use hub_events::EventBus;
use hub_store::{AuditRecord, AuditRepo, ExecutionRepo, ExecutionRow, HubStore, StoreError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::SchedulerError;
use crate::recovery;

const TIMEOUT_ACTION: &str = "execution.timeout";
const TIMEOUT_SUMMARY: &str = "no_heartbeat_within_timeout";

/// Watchdog timing.
#[derive(Clone, Copy, Debug)]
pub struct WatchdogConfig {
    /// Silence after which an executing run is considered dead.
    pub timeout: Duration,
    /// Time between sweeps.
    pub interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(30),
        }
    }
}

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Executions failed by this sweep.
    pub recovered: Vec<ExecutionId>,
    /// Candidates that reached another state before the update.
    pub skipped: usize,
    /// Candidates whose recovery transaction failed; retried next sweep.
    pub errors: usize,
}

/// Periodic recovery of executions whose worker went silent.
#[derive(Clone, Debug)]
pub struct Watchdog {
    store: HubStore,
    bus: EventBus,
    config: WatchdogConfig,
}

impl Watchdog {
    /// Create a watchdog.
    pub fn new(store: HubStore, bus: EventBus, config: WatchdogConfig) -> Self {
        Self { store, bus, config }
    }

    /// Timing in effect.
    pub fn config(&self) -> WatchdogConfig {
        self.config
    }

    /// Run one sweep synchronously.
    ///
    /// Listing failures abort the sweep; a failure on one candidate is
    /// counted and the sweep moves on.
    pub fn sweep(&self) -> Result<SweepReport, SchedulerError> {
        let cutoff = time::ago(self.config.timeout);
        let stale = ExecutionRepo::list_stale(&*self.store.conn()?, &cutoff)?;
        let mut report = SweepReport::default();

        for row in stale {
            match self.recover(&row) {
                Ok(true) => {
                    let execution_id = ExecutionId::from_raw(row.execution_id.as_str());
                    let trace_id = TraceId::from_raw(row.trace_id.as_str());
                    warn!(
                        execution_id = %execution_id,
                        trace_id = %trace_id,
                        last_event_ts = row.last_event_ts.as_deref().unwrap_or(""),
                        "execution timed out"
                    );
                    recovery::publish_timeout(&self.bus, &execution_id, Some(&trace_id));
                    report.recovered.push(execution_id);
                }
                Ok(false) => {
                    debug!(execution_id = %row.execution_id, "stale candidate moved on");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        execution_id = %row.execution_id,
                        error = %e,
                        "stale execution recovery failed"
                    );
                    report.errors += 1;
                }
            }
        }

        if !report.recovered.is_empty() || report.errors > 0 {
            info!(
                recovered = report.recovered.len(),
                skipped = report.skipped,
                errors = report.errors,
                "watchdog sweep finished"
            );
        }
        Ok(report)
    }

    fn recover(&self, row: &ExecutionRow) -> Result<bool, StoreError> {
        let now = time::now();
        let failed = self.store.immediate(|tx| {
            if !ExecutionRepo::fail_if_executing(tx, &row.execution_id, &now)? {
                return Ok(false);
            }
            recovery::release_session(tx, &ExecutionId::from_raw(row.execution_id.as_str()))?;
            Ok::<_, StoreError>(true)
        })?;
        if failed {
            self.audit_timeout(row, now);
        }
        Ok(failed)
    }

    fn audit_timeout(&self, row: &ExecutionRow, created_at: String) {
        let record = AuditRecord {
            workspace_id: row.workspace_id.clone(),
            project_id: row.project_id.clone(),
            session_id: row.session_id.clone(),
            execution_id: row.execution_id.clone(),
            user_id: "system".into(),
            action: TIMEOUT_ACTION.into(),
            parameters_summary: TIMEOUT_SUMMARY.into(),
            outcome: "failure".into(),
            trace_id: row.trace_id.clone(),
            created_at,
            ..Default::default()
        };
        let written = self
            .store
            .conn()
            .and_then(|conn| AuditRepo::record(&conn, &record));
        if let Err(e) = written {
            warn!(execution_id = %row.execution_id, error = %e, "timeout audit not written");
        }
    }

    /// Sweep every `interval` until `token` is cancelled.
    ///
    /// The first sweep happens one interval after start.
    pub async fn run(self, token: CancellationToken) {
        info!(
            timeout_secs = self.config.timeout.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "watchdog started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let watchdog = self.clone();
                    match tokio::task::spawn_blocking(move || watchdog.sweep()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "watchdog sweep failed"),
                        Err(e) => warn!(error = %e, "watchdog sweep panicked"),
                    }
                }
            }
        }
        info!("watchdog stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timing() {
        let config = WatchdogConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.interval, Duration::from_secs(30));
    }

    #[test]
    fn empty_store_sweeps_clean() {
        let store = HubStore::open_in_memory().unwrap();
        let watchdog = Watchdog::new(store, EventBus::default(), WatchdogConfig::default());
        assert_eq!(watchdog.sweep().unwrap(), SweepReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let store = HubStore::open_in_memory().unwrap();
        let watchdog = Watchdog::new(store, EventBus::default(), WatchdogConfig::default());
        let token = CancellationToken::new();
        let handle = watchdog.spawn(token.clone());
        tokio::time::sleep(Duration::from_secs(65)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
