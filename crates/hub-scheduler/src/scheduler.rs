//! Admission control and execution lifecycle.
//!
//! `execute` admits a new execution inside one `BEGIN IMMEDIATE` transaction:
//! session-busy check, then workspace quota, then insert and bind. The
//! transaction commits before anything talks to the worker; dispatch runs on
//! the [`DispatchPool`] and compensates on failure.

use std::path::Path;
use std::sync::Arc;

use hub_core::events::event_types;
use hub_core::{
    ExecutionEvent, ExecutionId, ExecutionInfo, ExecutionState, Sequence, SessionId, TraceId,
    UserId, WorkspaceId, time,
};
use hub_events::EventBus;
use hub_store::{ExecutionRepo, HubStore, NewExecution, ProjectRepo, SessionRepo};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{ExecutionContext, WorkerDispatcher};
use crate::errors::SchedulerError;
use crate::pool::DispatchPool;
use crate::recovery;

/// Admission settings.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Per-workspace cap on pending + executing executions; `0` disables it.
    pub max_concurrent_executions: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
        }
    }
}

/// A request to start an execution.
#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    /// Workspace the session must belong to.
    pub workspace_id: WorkspaceId,
    /// Target session.
    pub session_id: SessionId,
    /// Prompt text.
    pub user_message: String,
    /// Requesting user.
    pub user_id: UserId,
}

/// Grants or rejects executions and drives their state transitions.
/// Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: HubStore,
    bus: EventBus,
    dispatcher: Arc<dyn WorkerDispatcher>,
    pool: DispatchPool,
    config: SchedulerConfig,
    admission: Mutex<()>,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(
        store: HubStore,
        bus: EventBus,
        dispatcher: Arc<dyn WorkerDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                dispatcher,
                pool: DispatchPool::new(),
                config,
                admission: Mutex::new(()),
            }),
        }
    }

    /// The store this scheduler writes to.
    pub fn store(&self) -> &HubStore {
        &self.inner.store
    }

    /// The bus this scheduler publishes to.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The worker transport.
    pub fn dispatcher(&self) -> &Arc<dyn WorkerDispatcher> {
        &self.inner.dispatcher
    }

    /// Executor running dispatch jobs; drain it on shutdown.
    pub fn dispatch_pool(&self) -> &DispatchPool {
        &self.inner.pool
    }

    /// Admit a new execution and schedule its dispatch.
    ///
    /// Returns as soon as the admission commits, with the execution still
    /// `pending`.
    #[instrument(skip(self, request), fields(
        workspace_id = %request.workspace_id,
        session_id = %request.session_id,
    ))]
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionInfo, SchedulerError> {
        let (info, ctx) = self.blocking(move |inner| inner.admit(&request)).await?;
        info!(
            execution_id = %info.execution_id,
            trace_id = %info.trace_id,
            "execution admitted"
        );

        let inner = Arc::clone(&self.inner);
        self.inner.pool.spawn(inner.dispatch(ctx));
        Ok(info)
    }

    /// Cancel an execution. Repeated calls succeed and change nothing.
    ///
    /// The execution becomes `cancelled` whatever its prior state; a first
    /// `ended_at` is kept. The session mutex bound to it is released and a
    /// `cancelled` notice is published.
    #[instrument(skip(self))]
    pub async fn cancel_execution(
        &self,
        workspace_id: &WorkspaceId,
        execution_id: &ExecutionId,
    ) -> Result<(), SchedulerError> {
        let workspace_id = workspace_id.clone();
        let execution_id = execution_id.clone();
        self.blocking(move |inner| inner.cancel(&workspace_id, &execution_id))
            .await
    }

    /// Record the terminal state a worker reported.
    ///
    /// An empty `reported_state` means `completed`. Anything that is not a
    /// terminal state is rejected with [`SchedulerError::InvalidState`].
    #[instrument(skip(self))]
    pub async fn complete_execution(
        &self,
        execution_id: &ExecutionId,
        reported_state: &str,
    ) -> Result<(), SchedulerError> {
        let state = parse_terminal_state(reported_state)?;
        let execution_id = execution_id.clone();
        self.blocking(move |inner| inner.complete(&execution_id, state))
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, SchedulerError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| SchedulerError::Internal(format!("store task failed: {e}")))?
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn admit(
        &self,
        request: &ExecuteRequest,
    ) -> Result<(ExecutionInfo, ExecutionContext), SchedulerError> {
        let _admission = self.admission.lock();
        self.store.immediate(|tx| {
            let session = SessionRepo::get_in_workspace(
                tx,
                request.workspace_id.as_str(),
                request.session_id.as_str(),
            )?
            .ok_or_else(|| SchedulerError::session_not_found(&request.session_id))?;

            if let Some(active) = session.active_execution() {
                return Err(SchedulerError::SessionBusy {
                    session_id: request.session_id.clone(),
                    active_execution_id: ExecutionId::from_raw(active),
                });
            }

            let limit = self.config.max_concurrent_executions;
            if limit > 0 {
                let current =
                    ExecutionRepo::count_active_in_workspace(tx, request.workspace_id.as_str())?;
                if current >= limit {
                    return Err(SchedulerError::QuotaExceeded {
                        workspace_id: request.workspace_id.clone(),
                        limit,
                        current,
                    });
                }
            }

            let execution_id = ExecutionId::new();
            let trace_id = TraceId::new();
            let repo_root = ProjectRepo::repo_root(tx, &session.project_id)?;
            let worktree_root = if session.use_worktree && !repo_root.is_empty() {
                worktree_path(&repo_root, &execution_id)
            } else {
                String::new()
            };

            let _ = ExecutionRepo::insert(
                tx,
                &NewExecution {
                    execution_id: execution_id.as_str(),
                    session_id: request.session_id.as_str(),
                    project_id: &session.project_id,
                    workspace_id: request.workspace_id.as_str(),
                    created_by: request.user_id.as_str(),
                    trace_id: trace_id.as_str(),
                    user_message: &request.user_message,
                    repo_root: &repo_root,
                    worktree_root: &worktree_root,
                    use_worktree: session.use_worktree,
                },
            )?;
            let _ = SessionRepo::bind_execution(
                tx,
                request.session_id.as_str(),
                execution_id.as_str(),
            )?;

            let info = ExecutionInfo {
                execution_id: execution_id.clone(),
                trace_id: trace_id.clone(),
                session_id: request.session_id.clone(),
                state: ExecutionState::Pending,
            };
            let ctx = ExecutionContext {
                execution_id,
                session_id: request.session_id.clone(),
                project_id: session.project_id.clone(),
                workspace_id: request.workspace_id.to_string(),
                trace_id,
                user_message: request.user_message.clone(),
                mode: session.mode.clone(),
                use_worktree: session.use_worktree,
                repo_root,
                worktree_root,
                model_config_id: session.model_config_id.clone(),
                skill_set_ids: session.skill_set_ids.clone(),
                mcp_connector_ids: session.mcp_connector_ids.clone(),
                user_id: request.user_id.clone(),
            };
            Ok((info, ctx))
        })
    }

    async fn dispatch(self: Arc<Self>, ctx: ExecutionContext) {
        let outcome = self.dispatcher.dispatch(&ctx).await;
        let joined = tokio::task::spawn_blocking(move || match outcome {
            Ok(()) => self.mark_started(&ctx.execution_id),
            Err(err) => recovery::compensate_dispatch_failure(
                &self.store,
                &self.bus,
                &ctx.execution_id,
                &ctx.trace_id,
                &err,
            ),
        })
        .await;
        if let Err(e) = joined {
            warn!(error = %e, "dispatch bookkeeping task failed");
        }
    }

    fn mark_started(&self, execution_id: &ExecutionId) {
        let started = self.store.conn().and_then(|conn| {
            ExecutionRepo::mark_executing(&conn, execution_id.as_str(), &time::now())
        });
        match started {
            Ok(true) => debug!(execution_id = %execution_id, "execution dispatched"),
            // the worker already reported progress or a cancel won
            Ok(false) => {}
            Err(e) => warn!(
                execution_id = %execution_id,
                error = %e,
                "failed to mark execution started"
            ),
        }
    }

    fn cancel(
        &self,
        workspace_id: &WorkspaceId,
        execution_id: &ExecutionId,
    ) -> Result<(), SchedulerError> {
        let row = self.store.immediate(|tx| {
            let row = ExecutionRepo::get_in_workspace(tx, workspace_id.as_str(), execution_id.as_str())?
                .ok_or_else(|| SchedulerError::execution_not_found(execution_id))?;
            let _ = ExecutionRepo::cancel(tx, execution_id.as_str(), &time::now())?;
            recovery::release_session(tx, execution_id)?;
            Ok::<_, SchedulerError>(row)
        })?;

        info!(execution_id = %execution_id, prior_state = %row.state, "execution cancelled");
        self.bus.publish(ExecutionEvent::synthetic(
            execution_id.clone(),
            Some(TraceId::from_raw(row.trace_id)),
            Sequence::NOTICE,
            event_types::CANCELLED,
            serde_json::json!({ "status": ExecutionState::Cancelled.as_str() }),
        ));
        Ok(())
    }

    fn complete(&self, execution_id: &ExecutionId, state: ExecutionState) -> Result<(), SchedulerError> {
        let finished = self.store.immediate(|tx| {
            if ExecutionRepo::get(tx, execution_id.as_str())?.is_none() {
                return Err(SchedulerError::execution_not_found(execution_id));
            }
            let finished = ExecutionRepo::finish(tx, execution_id.as_str(), state, &time::now())?;
            recovery::release_session(tx, execution_id)?;
            Ok(finished)
        })?;
        info!(execution_id = %execution_id, state = %state, finished, "execution completed");
        Ok(())
    }
}

/// `<repo_root>/.hub/worktrees/<execution_id>`
fn worktree_path(repo_root: &str, execution_id: &ExecutionId) -> String {
    Path::new(repo_root)
        .join(".hub")
        .join("worktrees")
        .join(execution_id.as_str())
        .to_string_lossy()
        .into_owned()
}

pub(crate) fn parse_terminal_state(reported: &str) -> Result<ExecutionState, SchedulerError> {
    if reported.is_empty() {
        return Ok(ExecutionState::Completed);
    }
    let state: ExecutionState = reported
        .parse()
        .map_err(|e: hub_core::ParseStateError| SchedulerError::InvalidState(e.to_string()))?;
    if state.is_terminal() {
        Ok(state)
    } else {
        Err(SchedulerError::InvalidState(format!(
            "{reported} is not a terminal state"
        )))
    }
}
