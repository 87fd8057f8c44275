//! # hub-store
//!
//! `SQLite` persistence for the execution hub.
//!
//! The store is the single arbiter of two invariants:
//!
//! - **Session mutex**: at most one non-terminal execution per session,
//!   recorded in `sessions.active_execution_id`
//! - **Workspace quota**: the count of `pending`/`executing` executions per
//!   workspace, checked inside the same `BEGIN IMMEDIATE` transaction that
//!   inserts a new execution
//!
//! Repositories are stateless and take `&Connection`; [`HubStore`] owns the
//! pool and runs closures inside immediate transactions.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use rusqlite::{Connection, Transaction};
pub use sqlite::connection::ConnectionConfig;
pub use sqlite::repositories::{
    AuditRepo, CreateProjectOptions, CreateSessionOptions, ExecutionEventRepo, ExecutionRepo,
    NewExecution, ProjectRepo, SessionRepo,
};
pub use sqlite::row_types::{AuditRecord, ExecutionEventRow, ExecutionRow, ProjectRow, SessionRow};
pub use store::HubStore;
