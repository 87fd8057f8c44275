//! Handing admitted executions to the worker runtime.

use std::time::Duration;

use async_trait::async_trait;
use hub_core::{ExecutionId, SessionId, TraceId, UserId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::DispatchError;

/// Everything the worker needs to start an execution.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionContext {
    /// Execution to run.
    pub execution_id: ExecutionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Project reference (may be empty).
    pub project_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Correlation ID.
    pub trace_id: TraceId,
    /// Prompt text.
    pub user_message: String,
    /// Session mode.
    pub mode: String,
    /// Whether to work in a dedicated worktree.
    pub use_worktree: bool,
    /// Repository root.
    pub repo_root: String,
    /// Worktree path (empty when unused).
    pub worktree_root: String,
    /// Model configuration reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_config_id: Option<String>,
    /// Skill set IDs, JSON array text.
    pub skill_set_ids: String,
    /// MCP connector IDs, JSON array text.
    pub mcp_connector_ids: String,
    /// Requesting user.
    pub user_id: UserId,
}

/// A user's answer to a worker's confirmation request.
#[derive(Clone, Debug, Serialize)]
pub struct ConfirmationDecision {
    /// Execution that asked.
    pub execution_id: ExecutionId,
    /// Tool call awaiting the decision.
    pub call_id: String,
    /// `approved` or `denied`.
    pub decision: String,
    /// Deciding user.
    #[serde(skip)]
    pub user_id: UserId,
    /// Correlation ID.
    #[serde(skip)]
    pub trace_id: Option<TraceId>,
}

/// Transport to the worker runtime.
#[async_trait]
pub trait WorkerDispatcher: Send + Sync {
    /// Ask the worker to start an execution. Any error triggers compensation.
    async fn dispatch(&self, ctx: &ExecutionContext) -> Result<(), DispatchError>;

    /// Relay a confirmation decision to the worker.
    async fn forward_decision(&self, decision: &ConfirmationDecision) -> Result<(), DispatchError>;
}

const BODY_PREVIEW_LIMIT: usize = 512;

/// [`WorkerDispatcher`] posting JSON to the worker's internal HTTP API.
#[derive(Clone, Debug)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
    shared_secret: Option<String>,
}

impl HttpDispatcher {
    /// Build a dispatcher. An empty `base_url` means no worker is
    /// configured; every dispatch then fails with [`DispatchError::NoWorker`].
    pub fn new(
        base_url: &str,
        shared_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            shared_secret: shared_secret.filter(|s| !s.is_empty()),
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
        user_id: &UserId,
        trace_id: Option<&TraceId>,
    ) -> Result<(), DispatchError> {
        if self.base_url.is_empty() {
            return Err(DispatchError::NoWorker);
        }
        let url = format!("{}{path}", self.base_url);

        let mut request = self
            .client
            .post(&url)
            .header("X-User-Id", user_id.as_str())
            .json(body);
        if let Some(trace) = trace_id {
            request = request.header("X-Trace-Id", trace.as_str());
        }
        if let Some(secret) = &self.shared_secret {
            request = request.header("X-Hub-Auth", secret);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout
            } else {
                DispatchError::Transport(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, status = status.as_u16(), "worker accepted request");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > BODY_PREVIEW_LIMIT {
            let mut cut = BODY_PREVIEW_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        warn!(url = %url, status = status.as_u16(), "worker rejected request");
        Err(DispatchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl WorkerDispatcher for HttpDispatcher {
    async fn dispatch(&self, ctx: &ExecutionContext) -> Result<(), DispatchError> {
        self.post("/internal/executions", ctx, &ctx.user_id, Some(&ctx.trace_id))
            .await
    }

    async fn forward_decision(&self, decision: &ConfirmationDecision) -> Result<(), DispatchError> {
        self.post(
            "/internal/confirmations",
            decision,
            &decision.user_id,
            decision.trace_id.as_ref(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> ExecutionContext {
        ExecutionContext {
            execution_id: ExecutionId::from_raw("exec_1"),
            session_id: SessionId::from_raw("sess_1"),
            project_id: "proj_1".into(),
            workspace_id: "ws1".into(),
            trace_id: TraceId::from_raw("trace_1"),
            user_message: "hi".into(),
            mode: "agent".into(),
            use_worktree: false,
            repo_root: String::new(),
            worktree_root: String::new(),
            model_config_id: None,
            skill_set_ids: "[]".into(),
            mcp_connector_ids: "[]".into(),
            user_id: UserId::from_raw("user_1"),
        }
    }

    #[test]
    fn context_omits_absent_model_config() {
        let json = serde_json::to_value(context()).unwrap();
        assert!(json.get("model_config_id").is_none());
        assert_eq!(json["execution_id"], "exec_1");
        assert_eq!(json["skill_set_ids"], "[]");
    }

    #[tokio::test]
    async fn posts_context_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/executions"))
            .and(header("X-User-Id", "user_1"))
            .and(header("X-Trace-Id", "trace_1"))
            .and(header("X-Hub-Auth", "s3cret"))
            .and(body_partial_json(serde_json::json!({
                "execution_id": "exec_1",
                "user_message": "hi"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::new(
            &format!("{}/", server.uri()),
            Some("s3cret".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        dispatcher.dispatch(&context()).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/executions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = dispatcher.dispatch(&context()).await.unwrap_err();
        assert_matches!(err, DispatchError::Status { status: 503, ref body } if body == "overloaded");
    }

    #[tokio::test]
    async fn slow_worker_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let dispatcher =
            HttpDispatcher::new(&server.uri(), None, Duration::from_millis(100)).unwrap();
        let err = dispatcher.dispatch(&context()).await.unwrap_err();
        assert_matches!(err, DispatchError::Timeout);
    }

    #[tokio::test]
    async fn empty_base_url_means_no_worker() {
        let dispatcher = HttpDispatcher::new("  ", None, Duration::from_secs(1)).unwrap();
        let err = dispatcher.dispatch(&context()).await.unwrap_err();
        assert_matches!(err, DispatchError::NoWorker);
    }

    #[tokio::test]
    async fn forwards_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/confirmations"))
            .and(body_partial_json(serde_json::json!({
                "call_id": "call_1",
                "decision": "approved"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        dispatcher
            .forward_decision(&ConfirmationDecision {
                execution_id: ExecutionId::from_raw("exec_1"),
                call_id: "call_1".into(),
                decision: "approved".into(),
                user_id: UserId::from_raw("user_1"),
                trace_id: None,
            })
            .await
            .unwrap();
    }
}
