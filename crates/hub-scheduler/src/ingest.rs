//! Worker event ingestion and confirmation decisions.
//!
//! Workers post batches of progress events. A batch is stored in one
//! transaction: each event is persisted (repeats of a stored sequence are
//! ignored) and advances the execution heartbeat. Stored events are then
//! published to the bus. `done` hands the reported status to
//! [`Scheduler::complete_execution`].

use hub_core::events::event_types;
use hub_core::{
    ExecutionEvent, ExecutionId, Sequence, SessionStatus, TraceId, UserId, time,
};
use hub_store::{Connection, ExecutionEventRepo, ExecutionRepo, SessionRepo};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::dispatch::ConfirmationDecision;
use crate::errors::SchedulerError;
use crate::scheduler::Scheduler;

/// One event as posted by a worker.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkerEvent {
    /// Worker-assigned sequence.
    pub seq: i64,
    /// RFC 3339 timestamp; empty or invalid means "now".
    #[serde(default)]
    pub ts: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event body; absent means `{}`.
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Outcome of one ingested batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Events stored and published.
    pub accepted: usize,
    /// Events whose sequence was already stored.
    pub duplicates: usize,
}

/// Persists and fans out worker events on behalf of a [`Scheduler`].
#[derive(Clone, Debug)]
pub struct EventIngestor {
    scheduler: Scheduler,
}

struct Batch {
    fresh: Vec<ExecutionEvent>,
    done_status: Option<String>,
    duplicates: usize,
}

impl EventIngestor {
    /// Create an ingestor sharing the scheduler's store and bus.
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Ingest a batch of worker events for one execution.
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn ingest(
        &self,
        execution_id: &ExecutionId,
        events: Vec<WorkerEvent>,
    ) -> Result<IngestReport, SchedulerError> {
        let store = self.scheduler.store().clone();
        let id = execution_id.clone();
        let batch = tokio::task::spawn_blocking(move || {
            store.immediate(|tx| ingest_batch(tx, &id, events))
        })
        .await
        .map_err(|e| SchedulerError::Internal(format!("ingest task failed: {e}")))??;

        let report = IngestReport {
            accepted: batch.fresh.len(),
            duplicates: batch.duplicates,
        };
        for event in batch.fresh {
            self.scheduler.bus().publish(event);
        }

        if let Some(status) = batch.done_status {
            match self.scheduler.complete_execution(execution_id, &status).await {
                Err(SchedulerError::InvalidState(reason)) => {
                    warn!(
                        execution_id = %execution_id,
                        status = %status,
                        reason = %reason,
                        "worker reported an unusable final status, marking failed"
                    );
                    self.scheduler
                        .complete_execution(execution_id, "failed")
                        .await?;
                }
                other => other?,
            }
        }

        debug!(
            execution_id = %execution_id,
            accepted = report.accepted,
            duplicates = report.duplicates,
            "worker events ingested"
        );
        Ok(report)
    }

    /// Record a user's answer to a confirmation request.
    ///
    /// The session returns to `executing`, the decision is relayed to the
    /// worker (failures there are logged) and a `confirmation_decision`
    /// notice is published.
    #[instrument(skip(self))]
    pub async fn record_confirmation_decision(
        &self,
        execution_id: &ExecutionId,
        call_id: &str,
        decision: &str,
        user_id: &UserId,
    ) -> Result<(), SchedulerError> {
        if decision != "approved" && decision != "denied" {
            return Err(SchedulerError::InvalidState(format!(
                "decision must be approved or denied, got {decision:?}"
            )));
        }

        let store = self.scheduler.store().clone();
        let id = execution_id.clone();
        let trace_id = tokio::task::spawn_blocking(move || -> Result<Option<TraceId>, SchedulerError> {
            let conn = store.conn()?;
            let row = ExecutionRepo::get(&conn, id.as_str())?
                .ok_or_else(|| SchedulerError::execution_not_found(&id))?;
            let _ = SessionRepo::transition_status(
                &conn,
                id.as_str(),
                SessionStatus::WaitingConfirmation,
                SessionStatus::Executing,
            )?;
            Ok((!row.trace_id.is_empty()).then(|| TraceId::from_raw(row.trace_id)))
        })
        .await
        .map_err(|e| SchedulerError::Internal(format!("decision task failed: {e}")))??;

        let forward = ConfirmationDecision {
            execution_id: execution_id.clone(),
            call_id: call_id.to_string(),
            decision: decision.to_string(),
            user_id: user_id.clone(),
            trace_id: trace_id.clone(),
        };
        if let Err(e) = self.scheduler.dispatcher().forward_decision(&forward).await {
            warn!(execution_id = %execution_id, error = %e, "failed to forward decision to worker");
        }

        self.scheduler.bus().publish(ExecutionEvent::synthetic(
            execution_id.clone(),
            trace_id,
            Sequence::NOTICE,
            event_types::CONFIRMATION_DECISION,
            serde_json::json!({ "call_id": call_id, "decision": decision }),
        ));
        Ok(())
    }
}

/// Store one batch. Run inside a transaction so a failure keeps none of it.
fn ingest_batch(
    conn: &Connection,
    id: &ExecutionId,
    events: Vec<WorkerEvent>,
) -> Result<Batch, SchedulerError> {
    let row = ExecutionRepo::get(conn, id.as_str())?
        .ok_or_else(|| SchedulerError::execution_not_found(id))?;
    let trace_id = (!row.trace_id.is_empty()).then(|| TraceId::from_raw(row.trace_id));

    let mut batch = Batch {
        fresh: Vec::with_capacity(events.len()),
        done_status: None,
        duplicates: 0,
    };
    for raw in events {
        let event = to_event(id, trace_id.clone(), raw);
        let stored = ExecutionEventRepo::append(conn, &event)?;
        let _ = ExecutionRepo::record_heartbeat(conn, id.as_str(), &event.timestamp)?;

        if event.event_type == event_types::CONFIRMATION_REQUEST
            && event
                .payload
                .get("call_id")
                .and_then(Value::as_str)
                .is_some_and(|call| !call.is_empty())
        {
            let _ = SessionRepo::transition_status(
                conn,
                id.as_str(),
                SessionStatus::Executing,
                SessionStatus::WaitingConfirmation,
            )?;
        }
        if event.is_done() {
            batch.done_status = Some(
                event
                    .payload
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            );
        }

        if stored {
            batch.fresh.push(event);
        } else {
            batch.duplicates += 1;
        }
    }
    Ok(batch)
}

fn to_event(execution_id: &ExecutionId, trace_id: Option<TraceId>, raw: WorkerEvent) -> ExecutionEvent {
    ExecutionEvent {
        execution_id: execution_id.clone(),
        trace_id,
        sequence: Sequence::from(raw.seq),
        timestamp: time::normalize(&raw.ts).unwrap_or_else(time::now),
        event_type: raw.event_type,
        payload: match raw.payload {
            Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
            Some(value) => value,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_event_defaults() {
        let raw: WorkerEvent =
            serde_json::from_value(serde_json::json!({ "seq": 3, "type": "text_delta" })).unwrap();
        let event = to_event(&ExecutionId::from_raw("exec_1"), None, raw);
        assert_eq!(event.sequence, Sequence::Ordinal(3));
        assert_eq!(event.payload, serde_json::json!({}));
        assert!(time::normalize(&event.timestamp).is_some());
    }

    #[test]
    fn worker_timestamp_is_normalized() {
        let raw: WorkerEvent = serde_json::from_value(serde_json::json!({
            "seq": 1,
            "ts": "2026-01-02T03:04:05+01:00",
            "type": "text_delta",
            "payload": { "text": "hi" }
        }))
        .unwrap();
        let event = to_event(&ExecutionId::from_raw("exec_1"), None, raw);
        assert_eq!(event.timestamp, "2026-01-02T02:04:05.000000Z");
        assert_eq!(event.payload["text"], "hi");
    }
}
