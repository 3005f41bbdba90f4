//! Orchestration event bus.
//!
//! Lifecycle edges are announced as events on a broadcast bus rather than
//! presented directly - consumers (the batch aggregation layer, callback
//! responders, metrics) decide what to do with them. Delivery is
//! at-least-once from the consumer's perspective: a handler may observe an
//! event more than once and must be idempotent.

use crate::batch::{BatchId, OrderId, ProcessingState};
use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::job::{JobId, JobState};
use tokio::sync::broadcast;
use tracing::debug;

/// Events published by the job and batch orchestration layers.
#[derive(Clone, Debug)]
pub enum OrchestrationEvent {
    /// A job reached a terminal state.
    JobProcessingFinished {
        job_id: JobId,
        state: JobState,
        detail: Option<String>,
        batch_id: Option<BatchId>,
    },

    /// A batch order was registered and is ready for dispatch.
    BatchOrderRegistered { order_id: OrderId },

    /// A batch finished processing: every job of the batch reached a
    /// terminal state (or was accounted as a dispatch failure).
    BatchProcessingFinished {
        order_id: OrderId,
        batch_id: BatchId,
        /// Aggregate state of the owning order before this batch finished.
        order_state: ProcessingState,
        /// Final aggregate state of the batch.
        batch_state: ProcessingState,
        /// 1-based position of the batch within its order.
        batch_number: usize,
        detail: Option<String>,
    },

    /// The last batch of an order finished; carries the order aggregate.
    BatchOrderProcessingFinished {
        order_id: OrderId,
        state: ProcessingState,
    },
}

/// Broadcast bus for [`OrchestrationEvent`]s.
///
/// Cloneable; all clones publish into the same channel. Subscribers only
/// receive events published after they subscribe, so long-lived consumers
/// subscribe before any producer starts.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Never blocks and never fails; publishing with no subscribers simply
    /// drops the event.
    pub fn publish(&self, event: OrchestrationEvent) {
        if self.sender.send(event).is_err() {
            debug!("No subscribers on the event bus; event dropped");
        }
    }

    /// Creates a new subscription receiving all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscriptions.
    ///
    /// Long-lived consumers subscribe when their run loop starts; callers
    /// that must not publish into the void can wait for this to reach the
    /// expected count.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
