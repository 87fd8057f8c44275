//! Per-execution event fan-out with a bounded replay buffer.
//!
//! Each execution id owns a ring of its most recent events and a set of
//! subscriber queues. Publishing appends to the ring and offers the event to
//! every queue without blocking; a full queue drops the event for that
//! subscriber only.
//!
//! Subscribing snapshots the ring and registers the live queue under one
//! write-lock acquisition, so no event can fall between replay and live.
//! A forwarding task then drains the snapshot before the live queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hub_core::{ExecutionEvent, ExecutionId};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::subscription::{EventStream, Unsubscribe};

/// Sizing for an [`EventBus`].
#[derive(Clone, Copy, Debug)]
pub struct EventBusConfig {
    /// Events retained per execution for replay.
    pub ring_capacity: usize,
    /// Live events buffered per subscriber before events are dropped.
    ///
    /// The forwarding task may hold one more, with one waiting in the
    /// stream, so a stalled reader absorbs at most `subscriber_queue + 2`.
    pub subscriber_queue: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 500,
            subscriber_queue: 64,
        }
    }
}

type Subscriber = mpsc::Sender<Arc<ExecutionEvent>>;

#[derive(Debug, Default)]
struct ExecutionStream {
    recent: VecDeque<Arc<ExecutionEvent>>,
    subscribers: HashMap<u64, Subscriber>,
}

#[derive(Debug)]
pub(crate) struct BusInner {
    config: EventBusConfig,
    streams: RwLock<HashMap<ExecutionId, ExecutionStream>>,
    next_subscriber: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    pub(crate) fn remove_subscriber(&self, execution_id: &ExecutionId, subscriber_id: u64) {
        let mut streams = self.streams.write();
        if let Some(stream) = streams.get_mut(execution_id) {
            if stream.subscribers.remove(&subscriber_id).is_some() {
                debug!(execution_id = %execution_id, subscriber_id, "subscriber removed");
            }
        }
    }
}

/// In-memory pub/sub keyed by execution id. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with the given sizing.
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config: EventBusConfig {
                    ring_capacity: config.ring_capacity.max(1),
                    subscriber_queue: config.subscriber_queue.max(1),
                },
                streams: RwLock::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to its execution's stream.
    ///
    /// Never blocks on a subscriber. Subscribers whose stream has ended are
    /// pruned here.
    pub fn publish(&self, event: ExecutionEvent) {
        let event = Arc::new(event);
        let capacity = self.inner.config.ring_capacity;
        let mut streams = self.inner.streams.write();
        let stream = streams.entry(event.execution_id.clone()).or_default();

        stream.recent.push_back(Arc::clone(&event));
        while stream.recent.len() > capacity {
            let _ = stream.recent.pop_front();
        }

        let mut closed = Vec::new();
        for (&id, tx) in &stream.subscribers {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let _ = self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        execution_id = %event.execution_id,
                        subscriber_id = id,
                        seq = event.sequence.to_wire(),
                        "subscriber queue full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }
        for id in closed {
            let _ = stream.subscribers.remove(&id);
        }
    }

    /// Subscribe to an execution, replaying buffered events after `since`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, execution_id: &ExecutionId, since: i64) -> (EventStream, Unsubscribe) {
        self.subscribe_with(execution_id, since, CancellationToken::new())
    }

    /// Like [`subscribe`](Self::subscribe), but the subscription also ends
    /// when `parent` is cancelled.
    pub fn subscribe_until(
        &self,
        execution_id: &ExecutionId,
        since: i64,
        parent: &CancellationToken,
    ) -> (EventStream, Unsubscribe) {
        self.subscribe_with(execution_id, since, parent.child_token())
    }

    /// Buffered events after `since`, oldest first.
    pub fn recent_events(&self, execution_id: &ExecutionId, since: i64) -> Vec<Arc<ExecutionEvent>> {
        let streams = self.inner.streams.read();
        streams.get(execution_id).map_or_else(Vec::new, |stream| {
            stream
                .recent
                .iter()
                .filter(|e| e.sequence.is_after(since))
                .cloned()
                .collect()
        })
    }

    /// Live subscribers on an execution.
    pub fn subscriber_count(&self, execution_id: &ExecutionId) -> usize {
        self.inner
            .streams
            .read()
            .get(execution_id)
            .map_or(0, |s| s.subscribers.len())
    }

    /// Total events dropped on full subscriber queues since creation.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn subscribe_with(
        &self,
        execution_id: &ExecutionId,
        since: i64,
        token: CancellationToken,
    ) -> (EventStream, Unsubscribe) {
        let queue = self.inner.config.subscriber_queue;
        let subscriber_id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (live_tx, live_rx) = mpsc::channel(queue);
        // hand-off slot only; the live queue carries the budget
        let (out_tx, out_rx) = mpsc::channel(1);

        let replay: Vec<Arc<ExecutionEvent>> = {
            let mut streams = self.inner.streams.write();
            let stream = streams.entry(execution_id.clone()).or_default();
            let _ = stream.subscribers.insert(subscriber_id, live_tx);
            stream
                .recent
                .iter()
                .filter(|e| e.sequence.is_after(since))
                .cloned()
                .collect()
        };
        debug!(
            execution_id = %execution_id,
            subscriber_id,
            since,
            replay = replay.len(),
            "subscriber added"
        );

        let registration = Registration {
            bus: Arc::downgrade(&self.inner),
            execution_id: execution_id.clone(),
            subscriber_id,
        };
        let task_token = token.clone();
        drop(tokio::spawn(async move {
            forward(replay, live_rx, &out_tx, &task_token).await;
            // deregister before the consumer can observe end-of-stream
            drop(registration);
            drop(out_tx);
        }));

        let unsubscribe = Unsubscribe::new(
            Arc::downgrade(&self.inner),
            execution_id.clone(),
            subscriber_id,
            token,
        );
        (EventStream::new(out_rx), unsubscribe)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

/// Removes the subscriber on every exit path of the forwarding task.
struct Registration {
    bus: Weak<BusInner>,
    execution_id: ExecutionId,
    subscriber_id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_subscriber(&self.execution_id, self.subscriber_id);
        }
    }
}

async fn forward(
    replay: Vec<Arc<ExecutionEvent>>,
    mut live: mpsc::Receiver<Arc<ExecutionEvent>>,
    out: &mpsc::Sender<Arc<ExecutionEvent>>,
    token: &CancellationToken,
) {
    for event in replay {
        if !deliver(event, out, token).await {
            return;
        }
    }

    loop {
        let event = tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = out.closed() => return,
            event = live.recv() => event,
        };
        match event {
            Some(event) => {
                if !deliver(event, out, token).await {
                    return;
                }
            }
            None => return,
        }
    }
}

async fn deliver(
    event: Arc<ExecutionEvent>,
    out: &mpsc::Sender<Arc<ExecutionEvent>>,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        sent = out.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::Sequence;
    use proptest::prelude::*;
    use std::time::Duration;

    fn event(execution: &str, seq: i64) -> ExecutionEvent {
        ExecutionEvent {
            execution_id: ExecutionId::from_raw(execution),
            trace_id: None,
            sequence: Sequence::from(seq),
            timestamp: hub_core::time::now(),
            event_type: "text_delta".into(),
            payload: serde_json::json!({ "n": seq }),
        }
    }

    fn seqs(events: &[Arc<ExecutionEvent>]) -> Vec<i64> {
        events.iter().map(|e| e.sequence.to_wire()).collect()
    }

    async fn next(stream: &mut EventStream) -> Option<i64> {
        tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .ok()
            .flatten()
            .map(|e| e.sequence.to_wire())
    }

    #[test]
    fn ring_keeps_most_recent() {
        let bus = EventBus::default();
        for seq in 0..=500 {
            bus.publish(event("e1", seq));
        }
        let recent = bus.recent_events(&ExecutionId::from_raw("e1"), -1);
        assert_eq!(recent.len(), 500);
        assert_eq!(recent[0].sequence, Sequence::Ordinal(1));
        assert_eq!(recent[499].sequence, Sequence::Ordinal(500));
    }

    #[test]
    fn executions_are_isolated() {
        let bus = EventBus::default();
        bus.publish(event("e1", 1));
        bus.publish(event("e2", 1));
        bus.publish(event("e2", 2));
        assert_eq!(bus.recent_events(&ExecutionId::from_raw("e1"), -1).len(), 1);
        assert_eq!(bus.recent_events(&ExecutionId::from_raw("e2"), -1).len(), 2);
        assert!(bus.recent_events(&ExecutionId::from_raw("e3"), -1).is_empty());
    }

    #[test]
    fn synthetic_events_survive_positive_cursor() {
        let bus = EventBus::default();
        bus.publish(event("e1", 7));
        bus.publish(event("e1", -1));
        bus.publish(event("e1", -2));
        let id = ExecutionId::from_raw("e1");
        assert_eq!(seqs(&bus.recent_events(&id, 7)), [-1, -2]);
        assert_eq!(seqs(&bus.recent_events(&id, 0)), [7, -1, -2]);
    }

    #[test]
    fn negative_cursor_compares_synthetics_by_wire_value() {
        let bus = EventBus::default();
        bus.publish(event("e1", 7));
        bus.publish(event("e1", -1));
        bus.publish(event("e1", -2));
        let id = ExecutionId::from_raw("e1");
        assert_eq!(seqs(&bus.recent_events(&id, -1)), [7]);
        assert_eq!(seqs(&bus.recent_events(&id, -2)), [7, -1]);
        assert_eq!(seqs(&bus.recent_events(&id, -3)), [7, -1, -2]);
    }

    #[tokio::test]
    async fn replay_respects_cursor_then_goes_live() {
        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        for seq in 1..=5 {
            bus.publish(event("e1", seq));
        }
        let (mut stream, _unsub) = bus.subscribe(&id, 3);
        bus.publish(event("e1", 6));

        assert_eq!(next(&mut stream).await, Some(4));
        assert_eq!(next(&mut stream).await, Some(5));
        assert_eq!(next(&mut stream).await, Some(6));
    }

    #[tokio::test]
    async fn replay_precedes_events_published_during_replay() {
        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        for seq in 1..=100 {
            bus.publish(event("e1", seq));
        }
        let (mut stream, _unsub) = bus.subscribe(&id, 0);
        for seq in 101..=110 {
            bus.publish(event("e1", seq));
        }

        let mut got = Vec::new();
        while got.len() < 110 {
            got.push(next(&mut stream).await.unwrap());
        }
        assert_eq!(got, (1..=110).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_publisher() {
        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        let (mut stream, _unsub) = bus.subscribe(&id, 0);

        // the forwarding task has not run yet on this single-threaded runtime
        for seq in 1..=200 {
            bus.publish(event("e1", seq));
        }
        assert_eq!(bus.dropped_count(), 200 - 64);

        assert_eq!(next(&mut stream).await, Some(1));
        assert_eq!(bus.recent_events(&id, -1).len(), 200);
    }

    #[tokio::test]
    async fn stalled_reader_absorbs_queue_depth_plus_hand_off() {
        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        let (mut stream, _unsub) = bus.subscribe(&id, 0);

        for seq in 1..=200 {
            bus.publish(event("e1", seq));
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(bus.dropped_count(), 200 - 64 - 2);

        for expected in 1..=66 {
            assert_eq!(next(&mut stream).await, Some(expected));
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_ends_stream() {
        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        let (mut stream, unsub) = bus.subscribe(&id, 0);
        assert_eq!(bus.subscriber_count(&id), 1);

        unsub.cancel();
        unsub.cancel();
        assert!(unsub.is_cancelled());
        assert_eq!(bus.subscriber_count(&id), 0);

        bus.publish(event("e1", 1));
        assert_eq!(next(&mut stream).await, None);
    }

    #[tokio::test]
    async fn parent_token_ends_subscription() {
        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        let parent = CancellationToken::new();
        let (mut stream, unsub) = bus.subscribe_until(&id, 0, &parent);

        bus.publish(event("e1", 1));
        assert_eq!(next(&mut stream).await, Some(1));

        parent.cancel();
        assert_eq!(next(&mut stream).await, None);
        assert!(unsub.is_cancelled());
        assert_eq!(bus.subscriber_count(&id), 0);
    }

    #[tokio::test]
    async fn dropping_stream_deregisters() {
        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        let (stream, _unsub) = bus.subscribe(&id, 0);
        drop(stream);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.subscriber_count(&id), 0);
    }

    #[tokio::test]
    async fn stream_impl_yields_events() {
        use futures::StreamExt;

        let bus = EventBus::default();
        let id = ExecutionId::from_raw("e1");
        bus.publish(event("e1", 1));
        bus.publish(event("e1", 2));
        let (stream, unsub) = bus.subscribe(&id, 0);

        let first_two: Vec<_> = stream.take(2).map(|e| e.sequence.to_wire()).collect().await;
        assert_eq!(first_two, [1, 2]);
        unsub.cancel();
    }

    proptest! {
        #[test]
        fn recent_events_match_cursor_rule(
            wire in prop::collection::vec(-3i64..50, 0..600),
            cursor in -4i64..50,
        ) {
            let bus = EventBus::default();
            for &seq in &wire {
                bus.publish(event("e1", seq));
            }
            let kept = &wire[wire.len().saturating_sub(500)..];
            let expected: Vec<i64> = kept
                .iter()
                .copied()
                .filter(|&s| Sequence::from(s).is_after(cursor))
                .collect();
            let got = seqs(&bus.recent_events(&ExecutionId::from_raw("e1"), cursor));
            prop_assert_eq!(got, expected);
        }
    }
}
