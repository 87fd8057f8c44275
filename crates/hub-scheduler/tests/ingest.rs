#![allow(missing_docs)]

mod common;

use assert_matches::assert_matches;
use common::{StubDispatcher, active_execution, execution_state, harness, seed_session,
    session_status};
use hub_core::events::event_types;
use hub_core::{ExecutionId, ExecutionInfo, Sequence, SessionId, UserId};
use hub_scheduler::{EventIngestor, ExecuteRequest, IngestReport, SchedulerError, WorkerEvent};
use hub_store::ExecutionEventRepo;
use serde_json::json;

async fn start(h: &common::Harness) -> ExecutionInfo {
    seed_session(&h.store, "ws1", "s1");
    let info = h
        .scheduler
        .execute(ExecuteRequest {
            workspace_id: common::ws("ws1"),
            session_id: SessionId::from_raw("s1"),
            user_message: "hi".into(),
            user_id: UserId::from_raw("user_1"),
        })
        .await
        .unwrap();
    h.scheduler.dispatch_pool().drain().await;
    info
}

fn event(seq: i64, event_type: &str, payload: serde_json::Value) -> WorkerEvent {
    serde_json::from_value(json!({ "seq": seq, "type": event_type, "payload": payload })).unwrap()
}

#[tokio::test]
async fn events_are_stored_and_published_in_order() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());
    let (mut stream, _unsubscribe) = h.bus.subscribe(&info.execution_id, 0);

    let report = ingestor
        .ingest(
            &info.execution_id,
            vec![
                event(1, "text_delta", json!({ "text": "a" })),
                event(2, "text_delta", json!({ "text": "b" })),
            ],
        )
        .await
        .unwrap();
    assert_eq!(report, IngestReport { accepted: 2, duplicates: 0 });

    for expected in [1, 2] {
        let received = stream.recv().await.unwrap();
        assert_eq!(received.sequence, Sequence::Ordinal(expected));
        assert_eq!(received.trace_id.as_ref(), Some(&info.trace_id));
    }

    let stored = ExecutionEventRepo::list_after(
        &h.store.conn().unwrap(),
        info.execution_id.as_str(),
        0,
        10,
    )
    .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].payload_json, r#"{"text":"b"}"#);

    let row = hub_store::ExecutionRepo::get(&h.store.conn().unwrap(), info.execution_id.as_str())
        .unwrap()
        .unwrap();
    assert!(row.last_event_ts.is_some());
}

#[tokio::test]
async fn repeated_sequences_are_ignored() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let batch = || vec![event(1, "text_delta", json!({}))];
    let _ = ingestor.ingest(&info.execution_id, batch()).await.unwrap();
    let report = ingestor.ingest(&info.execution_id, batch()).await.unwrap();
    assert_eq!(report, IngestReport { accepted: 0, duplicates: 1 });
    assert_eq!(h.bus.recent_events(&info.execution_id, 0).len(), 1);
}

#[tokio::test]
async fn failed_batch_leaves_nothing_behind() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());
    h.store
        .conn()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_second BEFORE INSERT ON execution_events
             WHEN NEW.seq = 2 BEGIN SELECT RAISE(ABORT, 'disk hiccup'); END;",
        )
        .unwrap();

    let batch = || {
        vec![
            event(1, "text_delta", json!({ "text": "a" })),
            event(2, "text_delta", json!({ "text": "b" })),
        ]
    };
    let err = ingestor.ingest(&info.execution_id, batch()).await.unwrap_err();
    assert_matches!(err, SchedulerError::Store(_));
    assert!(h.bus.recent_events(&info.execution_id, 0).is_empty());
    let stored = ExecutionEventRepo::list_after(
        &h.store.conn().unwrap(),
        info.execution_id.as_str(),
        0,
        10,
    )
    .unwrap();
    assert!(stored.is_empty());

    h.store
        .conn()
        .unwrap()
        .execute_batch("DROP TRIGGER reject_second;")
        .unwrap();
    let report = ingestor.ingest(&info.execution_id, batch()).await.unwrap();
    assert_eq!(report, IngestReport { accepted: 2, duplicates: 0 });
    let sequences: Vec<_> = h
        .bus
        .recent_events(&info.execution_id, 0)
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, [Sequence::Ordinal(1), Sequence::Ordinal(2)]);
}

#[tokio::test]
async fn done_completes_and_frees_the_session() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let _ = ingestor
        .ingest(&info.execution_id, vec![event(5, event_types::DONE, json!({}))])
        .await
        .unwrap();
    assert_eq!(execution_state(&h.store, &info.execution_id), "completed");
    assert_eq!(active_execution(&h.store, "s1"), None);
    assert_eq!(session_status(&h.store, "s1"), "idle");
}

#[tokio::test]
async fn done_carries_reported_status() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let _ = ingestor
        .ingest(
            &info.execution_id,
            vec![event(3, event_types::DONE, json!({ "status": "failed" }))],
        )
        .await
        .unwrap();
    assert_eq!(execution_state(&h.store, &info.execution_id), "failed");
}

#[tokio::test]
async fn done_with_unusable_status_fails_the_execution() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let _ = ingestor
        .ingest(
            &info.execution_id,
            vec![event(3, event_types::DONE, json!({ "status": "executing" }))],
        )
        .await
        .unwrap();
    assert_eq!(execution_state(&h.store, &info.execution_id), "failed");
    assert_eq!(active_execution(&h.store, "s1"), None);
}

#[tokio::test]
async fn confirmation_round_trip_toggles_session_status() {
    let dispatcher = StubDispatcher::accepting();
    let h = harness(dispatcher.clone(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let _ = ingestor
        .ingest(
            &info.execution_id,
            vec![event(
                1,
                event_types::CONFIRMATION_REQUEST,
                json!({ "call_id": "call_1", "tool_name": "shell" }),
            )],
        )
        .await
        .unwrap();
    assert_eq!(session_status(&h.store, "s1"), "waiting_confirmation");

    ingestor
        .record_confirmation_decision(
            &info.execution_id,
            "call_1",
            "approved",
            &UserId::from_raw("user_1"),
        )
        .await
        .unwrap();
    assert_eq!(session_status(&h.store, "s1"), "executing");

    let decisions = dispatcher.decisions.lock().clone();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].call_id, "call_1");
    assert_eq!(decisions[0].trace_id.as_ref(), Some(&info.trace_id));

    let last = h
        .bus
        .recent_events(&info.execution_id, 0)
        .pop()
        .unwrap();
    assert_eq!(last.event_type, event_types::CONFIRMATION_DECISION);
    assert_eq!(last.sequence, Sequence::NOTICE);
    assert_eq!(last.payload, json!({ "call_id": "call_1", "decision": "approved" }));
}

#[tokio::test]
async fn confirmation_request_without_call_id_keeps_status() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let _ = ingestor
        .ingest(
            &info.execution_id,
            vec![event(1, event_types::CONFIRMATION_REQUEST, json!({}))],
        )
        .await
        .unwrap();
    assert_eq!(session_status(&h.store, "s1"), "executing");
}

#[tokio::test]
async fn invalid_decision_is_rejected() {
    let h = harness(StubDispatcher::accepting(), 5);
    let info = start(&h).await;
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let err = ingestor
        .record_confirmation_decision(&info.execution_id, "call_1", "maybe", &UserId::system())
        .await
        .unwrap_err();
    assert_matches!(err, SchedulerError::InvalidState(_));
}

#[tokio::test]
async fn unknown_execution_is_not_found() {
    let h = harness(StubDispatcher::accepting(), 5);
    let ingestor = EventIngestor::new(h.scheduler.clone());

    let err = ingestor
        .ingest(
            &ExecutionId::from_raw("exec_missing"),
            vec![event(1, "text_delta", json!({}))],
        )
        .await
        .unwrap_err();
    assert_matches!(err, SchedulerError::NotFound { kind: "execution", .. });
}
