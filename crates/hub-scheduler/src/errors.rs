//! Error types for admission, lifecycle transitions and dispatch.

use hub_core::{ExecutionId, SessionId, WorkspaceId};
use hub_store::StoreError;
use thiserror::Error;

/// Errors surfaced synchronously to callers of the scheduler and ingestor.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The session already has a non-terminal execution.
    #[error("session {session_id} is busy with execution {active_execution_id}")]
    SessionBusy {
        /// The busy session.
        session_id: SessionId,
        /// The execution holding it.
        active_execution_id: ExecutionId,
    },

    /// The workspace is at its concurrent execution limit.
    #[error("workspace {workspace_id} has {current} active executions (limit {limit})")]
    QuotaExceeded {
        /// The workspace at its limit.
        workspace_id: WorkspaceId,
        /// Configured limit.
        limit: usize,
        /// Active executions counted at admission.
        current: usize,
    },

    /// The session or execution does not exist (in that workspace).
    #[error("{kind} not found: {id}")]
    NotFound {
        /// `session` or `execution`.
        kind: &'static str,
        /// The identifier looked up.
        id: String,
    },

    /// A reported state or decision is not acceptable.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Runtime failure, e.g. a blocking task panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub(crate) fn session_not_found(id: &SessionId) -> Self {
        Self::NotFound {
            kind: "session",
            id: id.to_string(),
        }
    }

    pub(crate) fn execution_not_found(id: &ExecutionId) -> Self {
        Self::NotFound {
            kind: "execution",
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionBusy { .. } => "SESSION_BUSY",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Store(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether retrying the same request later can succeed.
    ///
    /// Quota frees up as executions finish; a busy session needs the caller
    /// to wait for or cancel the active execution first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Why handing an execution to the worker failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No worker base URL is configured.
    #[error("no worker configured")]
    NoWorker,

    /// The request did not complete within the dispatch timeout.
    #[error("worker request timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("worker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The worker answered with a non-2xx status.
    #[error("worker returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

impl DispatchError {
    /// Code placed in the synthetic `error` event.
    pub fn event_code(&self) -> &'static str {
        match self {
            Self::NoWorker => hub_core::events::error_codes::NO_WORKER,
            _ => hub_core::events::error_codes::WORKER_DISPATCH,
        }
    }
}
