//! Database row types.
//!
//! These mirror the table shape. State and status columns stay textual here;
//! the typed accessors parse them and surface unknown values as
//! [`StoreError::CorruptRow`](crate::errors::StoreError::CorruptRow).

use hub_core::{ExecutionState, ParseStateError, SessionStatus};
use serde::{Deserialize, Serialize};

/// Raw row from the `sessions` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    /// Session ID.
    pub session_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Project the session works on (empty when none).
    pub project_id: String,
    /// Optional title.
    pub title: Option<String>,
    /// Agent mode passed through to the worker.
    pub mode: String,
    /// Whether executions get their own worktree.
    pub use_worktree: bool,
    /// Model configuration reference.
    pub model_config_id: Option<String>,
    /// Skill set IDs as a JSON array string.
    pub skill_set_ids: String,
    /// MCP connector IDs as a JSON array string.
    pub mcp_connector_ids: String,
    /// The non-terminal execution holding the session, if any.
    pub active_execution_id: Option<String>,
    /// `idle`, `executing` or `waiting_confirmation`.
    pub status: String,
    /// Creating user.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

impl SessionRow {
    /// Parsed session status.
    pub fn status(&self) -> Result<SessionStatus, ParseStateError> {
        self.status.parse()
    }

    /// The bound execution, treating an empty string as unbound.
    pub fn active_execution(&self) -> Option<&str> {
        self.active_execution_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// Raw row from the `projects` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectRow {
    /// Project ID.
    pub project_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Display name.
    pub name: String,
    /// Local checkout used by workers.
    pub repo_cache_path: Option<String>,
    /// Upstream location.
    pub root_uri: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl ProjectRow {
    /// Repository root: the cache path, else the root URI, else empty.
    pub fn repo_root(&self) -> &str {
        self.repo_cache_path
            .as_deref()
            .or(self.root_uri.as_deref())
            .unwrap_or("")
    }
}

/// Raw row from the `executions` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRow {
    /// Execution ID.
    pub execution_id: String,
    /// Owning session.
    pub session_id: String,
    /// Project (empty when none).
    pub project_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Requesting user.
    pub created_by: String,
    /// Lifecycle state.
    pub state: String,
    /// Correlation ID.
    pub trace_id: String,
    /// Prompt that started the run.
    pub user_message: String,
    /// Repository root at admission time.
    pub repo_root: String,
    /// Per-execution worktree path (empty when unused).
    pub worktree_root: String,
    /// Whether a worktree was requested.
    pub use_worktree: bool,
    /// Admission timestamp.
    pub created_at: String,
    /// When the run started executing.
    pub started_at: Option<String>,
    /// When the run reached a terminal state.
    pub ended_at: Option<String>,
    /// Timestamp of the latest worker event (heartbeat).
    pub last_event_ts: Option<String>,
}

impl ExecutionRow {
    /// Parsed lifecycle state.
    pub fn state(&self) -> Result<ExecutionState, ParseStateError> {
        self.state.parse()
    }
}

/// Raw row from the `execution_events` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionEventRow {
    /// Owning execution.
    pub execution_id: String,
    /// Wire sequence.
    pub seq: i64,
    /// Canonical timestamp.
    pub ts: String,
    /// Event type.
    pub event_type: String,
    /// Payload as JSON text.
    pub payload_json: String,
}

/// Row from the `audit_logs` table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Audit ID.
    pub audit_id: String,
    /// Workspace scope.
    pub workspace_id: String,
    /// Project scope.
    pub project_id: String,
    /// Session scope.
    pub session_id: String,
    /// Execution scope.
    pub execution_id: String,
    /// Acting user (`system` for hub-initiated actions).
    pub user_id: String,
    /// Action name, e.g. `execution.timeout`.
    pub action: String,
    /// Tool involved, if any.
    pub tool_name: String,
    /// Short description of the parameters.
    pub parameters_summary: String,
    /// `success` or `failure`.
    pub outcome: String,
    /// Correlation ID.
    pub trace_id: String,
    /// Creation timestamp.
    pub created_at: String,
}
