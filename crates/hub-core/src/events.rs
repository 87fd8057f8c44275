//! Execution progress events.
//!
//! Workers assign ordinal sequence numbers; they are expected to grow but may
//! skip or repeat. The hub itself emits synthetic control events (cancel,
//! dispatch failure, watchdog timeout) that carry reserved negative sequence
//! numbers on the wire. [`Sequence`] keeps the two apart in Rust while
//! serializing to the single signed integer clients already understand.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ExecutionId, TraceId};
use crate::time;

/// Event type names with special meaning to the hub.
pub mod event_types {
    /// Terminal event; payload `status` names the final state.
    pub const DONE: &str = "done";
    /// Error notice; payload carries `error.code` and `error.message`.
    pub const ERROR: &str = "error";
    /// Emitted when a caller cancels the execution.
    pub const CANCELLED: &str = "cancelled";
    /// Worker asks the user to approve a tool call.
    pub const CONFIRMATION_REQUEST: &str = "confirmation_request";
    /// Hub relays the user's approval or denial.
    pub const CONFIRMATION_DECISION: &str = "confirmation_decision";
}

/// Error codes placed in synthetic `error` events.
pub mod error_codes {
    /// The worker never reported progress within the watchdog timeout.
    pub const EXECUTION_TIMEOUT: &str = "E_EXECUTION_TIMEOUT";
    /// Posting the execution to the worker failed.
    pub const WORKER_DISPATCH: &str = "E_WORKER_DISPATCH";
    /// No worker base URL is configured.
    pub const NO_WORKER: &str = "E_NO_WORKER";
}

/// Position of an event in its execution's stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Sequence {
    /// Worker-assigned position (wire value `n`).
    Ordinal(u64),
    /// Hub-emitted control event (wire value `-k`, `k >= 1`).
    Synthetic(u32),
}

impl Sequence {
    /// First synthetic slot: cancel notices, dispatch and timeout errors.
    pub const NOTICE: Self = Self::Synthetic(1);
    /// Second synthetic slot: the synthetic `done` that closes a stream.
    pub const TERMINAL: Self = Self::Synthetic(2);

    /// Signed wire representation.
    pub fn to_wire(self) -> i64 {
        match self {
            Self::Ordinal(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Self::Synthetic(k) => -i64::from(k),
        }
    }

    /// Whether this is a hub-emitted control event.
    pub fn is_synthetic(self) -> bool {
        matches!(self, Self::Synthetic(_))
    }

    /// Whether an event at this position must be delivered to a client
    /// resuming from `cursor`.
    ///
    /// Ordinals are after the cursor when strictly greater. Synthetic events
    /// are fresher than any non-negative cursor; against a negative cursor
    /// they compare by wire value.
    pub fn is_after(self, cursor: i64) -> bool {
        match self {
            Self::Ordinal(_) => self.to_wire() > cursor,
            Self::Synthetic(_) => cursor >= 0 || self.to_wire() > cursor,
        }
    }
}

impl From<i64> for Sequence {
    fn from(wire: i64) -> Self {
        if wire >= 0 {
            Self::Ordinal(wire.unsigned_abs())
        } else {
            Self::Synthetic(u32::try_from(wire.unsigned_abs()).unwrap_or(u32::MAX))
        }
    }
}

impl From<Sequence> for i64 {
    fn from(seq: Sequence) -> Self {
        seq.to_wire()
    }
}

/// One progress event of an execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Owning execution.
    pub execution_id: ExecutionId,
    /// Correlation id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    /// Stream position.
    #[serde(rename = "seq")]
    pub sequence: Sequence,
    /// Canonical RFC 3339 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: String,
    /// Event type, e.g. `"text_delta"`, `"error"`, `"done"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event body.
    pub payload: Value,
}

impl ExecutionEvent {
    /// Build a hub-emitted control event stamped with the current time.
    pub fn synthetic(
        execution_id: ExecutionId,
        trace_id: Option<TraceId>,
        sequence: Sequence,
        event_type: &str,
        payload: Value,
    ) -> Self {
        Self {
            execution_id,
            trace_id,
            sequence,
            timestamp: time::now(),
            event_type: event_type.to_string(),
            payload,
        }
    }

    /// Synthetic `error` event with the standard `{"error": {...}}` body.
    pub fn error(
        execution_id: ExecutionId,
        trace_id: Option<TraceId>,
        code: &str,
        message: &str,
    ) -> Self {
        let mut error = serde_json::json!({ "code": code, "message": message });
        if let Some(trace) = &trace_id {
            error["trace_id"] = Value::String(trace.to_string());
        }
        Self::synthetic(
            execution_id,
            trace_id,
            Sequence::NOTICE,
            event_types::ERROR,
            serde_json::json!({ "error": error }),
        )
    }

    /// Whether the event ends its stream.
    pub fn is_done(&self) -> bool {
        self.event_type == event_types::DONE
    }
}
