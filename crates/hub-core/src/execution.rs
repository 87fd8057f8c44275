//! Execution and session lifecycle enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{ExecutionId, SessionId, TraceId};

/// Error returned when a database or wire string names no known state.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseStateError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Lifecycle state of one execution.
///
/// `Pending` and `Executing` are active; the rest are terminal. Transitions
/// only move toward a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Admitted, not yet accepted by a worker.
    Pending,
    /// A worker accepted the execution.
    Executing,
    /// Finished successfully.
    Completed,
    /// Finished with an error, a dispatch failure or a watchdog timeout.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl ExecutionState {
    /// States counted against the workspace quota.
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Executing];

    /// Database/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the execution still holds its session mutex.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Executing)
    }

    /// Whether the execution reached a final state.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = ParseStateError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseStateError {
                kind: "execution state",
                value: other.to_string(),
            }),
        }
    }
}

/// Session status, mirrored from the session mutex.
///
/// `active_execution_id` is set exactly when the status is `Executing` or
/// `WaitingConfirmation`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No execution in flight.
    Idle,
    /// An execution holds the session.
    Executing,
    /// The execution is paused on a tool confirmation.
    WaitingConfirmation,
}

impl SessionStatus {
    /// Database/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::WaitingConfirmation => "waiting_confirmation",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseStateError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "executing" => Ok(Self::Executing),
            "waiting_confirmation" => Ok(Self::WaitingConfirmation),
            other => Err(ParseStateError {
                kind: "session status",
                value: other.to_string(),
            }),
        }
    }
}

/// Immediate answer to an admitted `execute` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// The new execution.
    pub execution_id: ExecutionId,
    /// Correlation id for logs, events and audit rows.
    pub trace_id: TraceId,
    /// Session now locked by the execution.
    pub session_id: SessionId,
    /// Always [`ExecutionState::Pending`] at admission time.
    pub state: ExecutionState,
}
