//! Inbound event queue between the cluster client and the dispatch loop.
//!
//! Many producers push without blocking; one consumer awaits the next item.
//! Cancelling the queue wakes a pending `get` with `None` and makes every
//! later `get` return `None` as well.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tron_core::ClusterEvent;

/// Producer handle for the event queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ClusterEvent>,
}

impl EventSender {
    /// Wrap an unbounded channel sender.
    pub fn new(tx: mpsc::UnboundedSender<ClusterEvent>) -> Self {
        Self { tx }
    }

    /// Push an event. Never blocks; returns false once the queue is gone.
    pub fn send(&self, event: impl Into<ClusterEvent>) -> bool {
        match self.tx.send(event.into()) {
            Ok(()) => true,
            Err(e) => {
                debug!(event = ?e.0, "Event queue closed, dropping event");
                false
            }
        }
    }
}

/// Queue the coordinator drains one event at a time.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Handle for producers.
    fn sender(&self) -> EventSender;

    /// Wait for the next event. `None` once cancelled.
    async fn get(&self) -> Option<ClusterEvent>;

    /// Cancel the pending and all future reads.
    fn cancel(&self);
}

/// Unbounded in-memory queue.
pub struct UnboundedEventQueue {
    tx: mpsc::UnboundedSender<ClusterEvent>,
    rx: Mutex<mpsc::UnboundedReceiver<ClusterEvent>>,
    cancel: CancellationToken,
}

impl UnboundedEventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for UnboundedEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventQueue for UnboundedEventQueue {
    fn sender(&self) -> EventSender {
        EventSender::new(self.tx.clone())
    }

    async fn get(&self) -> Option<ClusterEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = rx.recv() => event,
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tron_core::{TaskEvent, TaskId};

    #[tokio::test]
    async fn test_events_come_out_in_push_order() {
        let queue = UnboundedEventQueue::new();
        let sender = queue.sender();

        assert!(sender.send(TaskEvent::new(TaskId::new("a"), "staging")));
        assert!(sender.send(TaskEvent::new(TaskId::new("b"), "running")));

        match queue.get().await {
            Some(ClusterEvent::Task(ev)) => assert_eq!(ev.task_id, TaskId::new("a")),
            other => panic!("Expected task event, got {:?}", other),
        }
        match queue.get().await {
            Some(ClusterEvent::Task(ev)) => assert_eq!(ev.task_id, TaskId::new("b")),
            other => panic!("Expected task event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_push() {
        let queue = Arc::new(UnboundedEventQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.sender().send(ClusterEvent::stop());

        let event = consumer.await.unwrap();
        assert_eq!(event, Some(ClusterEvent::stop()));
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_get() {
        let queue = Arc::new(UnboundedEventQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.cancel();

        assert_eq!(consumer.await.unwrap(), None);
        assert!(queue.is_cancelled());

        // Later reads stay cancelled even with items queued.
        queue.sender().send(ClusterEvent::stop());
        assert_eq!(queue.get().await, None);
    }
}
