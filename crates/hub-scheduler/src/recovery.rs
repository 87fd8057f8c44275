//! Release and notify primitives shared by every path that ends an
//! execution abnormally: dispatch compensation, cancellation and the
//! watchdog.

use hub_core::events::{error_codes, event_types};
use hub_core::{ExecutionEvent, ExecutionId, ExecutionState, Sequence, TraceId, time};
use hub_events::EventBus;
use hub_store::{Connection, ExecutionRepo, HubStore, SessionRepo, StoreError};
use tracing::{debug, warn};

use crate::errors::DispatchError;

/// Clear the session mutex held by `execution_id`.
pub(crate) fn release_session(
    conn: &Connection,
    execution_id: &ExecutionId,
) -> Result<(), StoreError> {
    let released = SessionRepo::release_execution(conn, execution_id.as_str())?;
    debug!(execution_id = %execution_id, released, "session mutex released");
    Ok(())
}

/// Publish a synthetic `error` notice.
pub(crate) fn publish_error(
    bus: &EventBus,
    execution_id: &ExecutionId,
    trace_id: Option<&TraceId>,
    code: &str,
    message: &str,
) {
    bus.publish(ExecutionEvent::error(
        execution_id.clone(),
        trace_id.cloned(),
        code,
        message,
    ));
}

/// Publish the synthetic `done` that closes a stream the worker never closed.
pub(crate) fn publish_done(
    bus: &EventBus,
    execution_id: &ExecutionId,
    trace_id: Option<&TraceId>,
    status: ExecutionState,
    message: &str,
) {
    bus.publish(ExecutionEvent::synthetic(
        execution_id.clone(),
        trace_id.cloned(),
        Sequence::TERMINAL,
        event_types::DONE,
        serde_json::json!({ "status": status.as_str(), "message": message }),
    ));
}

/// Undo an admission whose dispatch failed.
///
/// Fails the execution if it is still active, frees its session and tells
/// subscribers why. Errors are logged; the watchdog cannot see a pending
/// execution, so a failure here leaves it for manual cancellation.
pub(crate) fn compensate_dispatch_failure(
    store: &HubStore,
    bus: &EventBus,
    execution_id: &ExecutionId,
    trace_id: &TraceId,
    error: &DispatchError,
) {
    let result = store.immediate(|tx| {
        let failed = ExecutionRepo::finish(
            tx,
            execution_id.as_str(),
            ExecutionState::Failed,
            &time::now(),
        )?;
        release_session(tx, execution_id)?;
        Ok::<_, StoreError>(failed)
    });

    match result {
        Ok(failed) => {
            warn!(
                execution_id = %execution_id,
                trace_id = %trace_id,
                failed,
                error = %error,
                "dispatch failed, execution released"
            );
        }
        Err(e) => {
            warn!(
                execution_id = %execution_id,
                error = %e,
                dispatch_error = %error,
                "dispatch compensation failed"
            );
        }
    }

    let message = match error {
        DispatchError::NoWorker => "no worker configured".to_string(),
        other => format!("failed to dispatch execution: {other}"),
    };
    publish_error(bus, execution_id, Some(trace_id), error.event_code(), &message);
}

/// Publish the watchdog's error-then-done pair.
pub(crate) fn publish_timeout(
    bus: &EventBus,
    execution_id: &ExecutionId,
    trace_id: Option<&TraceId>,
) {
    publish_error(
        bus,
        execution_id,
        trace_id,
        error_codes::EXECUTION_TIMEOUT,
        "execution timed out: no heartbeat within timeout",
    );
    publish_done(
        bus,
        execution_id,
        trace_id,
        ExecutionState::Failed,
        "execution timed out",
    );
}
