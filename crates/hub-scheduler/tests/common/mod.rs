#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{ExecutionId, WorkspaceId};
use hub_events::EventBus;
use hub_scheduler::{
    ConfirmationDecision, DispatchError, ExecutionContext, Scheduler, SchedulerConfig,
    WorkerDispatcher,
};
use hub_store::{CreateProjectOptions, CreateSessionOptions, HubStore, ProjectRepo, SessionRepo};
use parking_lot::Mutex;

/// Dispatcher that records every call and answers with a fixed outcome.
#[derive(Default)]
pub struct StubDispatcher {
    pub fail: bool,
    pub delay: Option<Duration>,
    pub dispatched: Mutex<Vec<ExecutionContext>>,
    pub decisions: Mutex<Vec<ConfirmationDecision>>,
}

impl StubDispatcher {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }
}

#[async_trait]
impl WorkerDispatcher for StubDispatcher {
    async fn dispatch(&self, ctx: &ExecutionContext) -> Result<(), DispatchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.dispatched.lock().push(ctx.clone());
        if self.fail {
            Err(DispatchError::Status {
                status: 503,
                body: "unavailable".into(),
            })
        } else {
            Ok(())
        }
    }

    async fn forward_decision(&self, decision: &ConfirmationDecision) -> Result<(), DispatchError> {
        self.decisions.lock().push(decision.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: HubStore,
    pub bus: EventBus,
    pub scheduler: Scheduler,
}

pub fn harness(dispatcher: Arc<StubDispatcher>, limit: usize) -> Harness {
    let store = HubStore::open_in_memory().unwrap();
    let bus = EventBus::default();
    let scheduler = Scheduler::new(
        store.clone(),
        bus.clone(),
        dispatcher,
        SchedulerConfig {
            max_concurrent_executions: limit,
        },
    );
    Harness {
        store,
        bus,
        scheduler,
    }
}

pub fn seed_project(store: &HubStore, workspace: &str, project: &str, repo: &str) {
    let conn = store.conn().unwrap();
    let _ = ProjectRepo::create(
        &conn,
        &CreateProjectOptions {
            project_id: Some(project),
            workspace_id: workspace,
            name: project,
            repo_cache_path: Some(repo),
            root_uri: None,
        },
    )
    .unwrap();
}

pub fn seed_session(store: &HubStore, workspace: &str, session: &str) {
    seed_session_with(store, workspace, session, "", false);
}

pub fn seed_session_with(
    store: &HubStore,
    workspace: &str,
    session: &str,
    project: &str,
    use_worktree: bool,
) {
    let conn = store.conn().unwrap();
    let _ = SessionRepo::create(
        &conn,
        &CreateSessionOptions {
            session_id: Some(session),
            workspace_id: workspace,
            project_id: project,
            use_worktree,
            created_by: "user_1",
            ..Default::default()
        },
    )
    .unwrap();
}

pub fn execution_state(store: &HubStore, id: &ExecutionId) -> String {
    let conn = store.conn().unwrap();
    hub_store::ExecutionRepo::get(&conn, id.as_str())
        .unwrap()
        .unwrap()
        .state
}

pub fn active_execution(store: &HubStore, session: &str) -> Option<String> {
    let conn = store.conn().unwrap();
    SessionRepo::get(&conn, session)
        .unwrap()
        .unwrap()
        .active_execution()
        .map(String::from)
}

pub fn session_status(store: &HubStore, session: &str) -> String {
    let conn = store.conn().unwrap();
    SessionRepo::get(&conn, session).unwrap().unwrap().status
}

pub fn ws(id: &str) -> WorkspaceId {
    WorkspaceId::from_raw(id)
}
