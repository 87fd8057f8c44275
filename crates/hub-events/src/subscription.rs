//! Consumer-side handles returned by [`EventBus::subscribe`](crate::EventBus::subscribe).

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use hub_core::{ExecutionEvent, ExecutionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::BusInner;

/// Ordered stream of events for one execution: buffered replay first, then
/// live events. Ends after the subscription is cancelled.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Arc<ExecutionEvent>>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<Arc<ExecutionEvent>>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Arc<ExecutionEvent>> {
        self.rx.recv().await
    }

    /// Next event if one is ready right now.
    pub fn try_recv(&mut self) -> Option<Arc<ExecutionEvent>> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = Arc<ExecutionEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Cancels a subscription. Safe to call more than once and concurrently
/// with publishing.
///
/// Dropping the handle does not cancel; drop the [`EventStream`] or call
/// [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    execution_id: ExecutionId,
    subscriber_id: u64,
    token: CancellationToken,
}

impl Unsubscribe {
    pub(crate) fn new(
        bus: Weak<BusInner>,
        execution_id: ExecutionId,
        subscriber_id: u64,
        token: CancellationToken,
    ) -> Self {
        Self {
            bus,
            execution_id,
            subscriber_id,
            token,
        }
    }

    /// Deregister the subscriber and end its stream.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_subscriber(&self.execution_id, self.subscriber_id);
        }
    }

    /// Whether [`cancel`](Self::cancel) ran or the parent token fired.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
