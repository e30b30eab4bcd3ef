//! Event fan-out to connected observers

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use testdeck_common::RunEvent;
use tokio::sync::mpsc;
use tracing::debug;

/// Handle identifying one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Fans lifecycle and log events out to all currently connected observers.
///
/// Each observer gets its own unbounded channel, so a slow consumer never
/// blocks the orchestrator or other observers. Publishes happen under one
/// lock, which is what makes per-observer delivery order equal publish order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    observers: HashMap<u64, mpsc::UnboundedSender<RunEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. It receives events published from this moment
    /// onward; there is no replay of past events.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<RunEvent>) {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        inner.observers.insert(id, tx);

        debug!("Observer {} subscribed ({} connected)", id, inner.observers.len());
        (ObserverId(id), rx)
    }

    /// Remove an observer. Safe to call repeatedly or after the observer
    /// already disconnected.
    pub fn unsubscribe(&self, id: ObserverId) {
        let mut inner = self.inner.lock();
        if inner.observers.remove(&id.0).is_some() {
            debug!("Observer {} unsubscribed ({} connected)", id.0, inner.observers.len());
        }
    }

    /// Deliver an event to every live observer, pruning the ones whose
    /// receiver has gone away.
    pub fn publish(&self, event: RunEvent) {
        let mut inner = self.inner.lock();
        inner
            .observers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::RunStatus;

    fn end_event(run_id: &str) -> RunEvent {
        RunEvent::End {
            run_id: run_id.to_string(),
            result: RunStatus::Passed,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe();

        for i in 0..10 {
            bus.publish(end_event(&format!("run-{}", i)));
        }

        for i in 0..10 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.run_id(), format!("run-{}", i));
        }
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.publish(end_event("before"));

        let (_id, mut rx) = bus.subscribe();
        bus.publish(end_event("after"));

        assert_eq!(rx.recv().await.unwrap().run_id(), "after");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe();

        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.observer_count(), 0);

        bus.publish(end_event("r"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_observers_are_pruned() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe();
        let (_keep_id, mut keep_rx) = bus.subscribe();
        drop(rx);

        bus.publish(end_event("r"));
        assert_eq!(bus.observer_count(), 1);
        assert_eq!(keep_rx.recv().await.unwrap().run_id(), "r");
    }
}
