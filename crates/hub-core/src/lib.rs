//! # hub-core
//!
//! Foundation types shared by every hub crate:
//!
//! - **Branded IDs**: `SessionId`, `ExecutionId`, `WorkspaceId`, `TraceId`, ... as
//!   newtypes so identifiers cannot be mixed up at call sites
//! - **Lifecycle enums**: [`ExecutionState`] and [`SessionStatus`] with their
//!   textual database form
//! - **Events**: [`ExecutionEvent`] and the tagged [`Sequence`] that separates
//!   worker-assigned ordinals from synthetic control events
//! - **Time**: canonical RFC 3339 timestamps that sort lexicographically
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod events;
pub mod execution;
pub mod ids;
pub mod logging;
pub mod time;

pub use events::{ExecutionEvent, Sequence};
pub use execution::{ExecutionInfo, ExecutionState, ParseStateError, SessionStatus};
pub use ids::{AuditId, ExecutionId, ProjectId, SessionId, TraceId, UserId, WorkspaceId};
