//! # hub-scheduler
//!
//! Execution admission, dispatch and recovery.
//!
//! - [`Scheduler`]: admits executions under the session mutex and workspace
//!   quota, hands them to the worker off the caller's path and records
//!   cancellation and completion
//! - [`WorkerDispatcher`] / [`HttpDispatcher`]: transport to the worker
//!   runtime
//! - [`DispatchPool`]: tracked executor for dispatch jobs
//! - [`Watchdog`]: fails executions whose worker stopped sending events
//! - [`EventIngestor`]: persists and publishes worker events

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod ingest;
pub mod pool;
mod recovery;
pub mod scheduler;
pub mod watchdog;

pub use dispatch::{ConfirmationDecision, ExecutionContext, HttpDispatcher, WorkerDispatcher};
pub use errors::{DispatchError, SchedulerError};
pub use ingest::{EventIngestor, IngestReport, WorkerEvent};
pub use pool::DispatchPool;
pub use scheduler::{ExecuteRequest, Scheduler, SchedulerConfig};
pub use watchdog::{SweepReport, Watchdog, WatchdogConfig};
