//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`,
//! so the same calls work on a pooled connection or inside a transaction.

pub mod audit;
pub mod execution;
pub mod execution_event;
pub mod project;
pub mod session;

pub use audit::AuditRepo;
pub use execution::{ExecutionRepo, NewExecution};
pub use execution_event::ExecutionEventRepo;
pub use project::{CreateProjectOptions, ProjectRepo};
pub use session::{CreateSessionOptions, SessionRepo};
