use std::sync::Arc;

use parking_lot::Mutex;

/// The well-known topic the execution manager subscribes to
pub const EXECUTION_EVENT_TOPIC: &str = "trajectory_execution_event";

type EventHandler = Arc<dyn Fn(&str) + Send + Sync>;

struct Subscription {
    topic: Arc<str>,
    handler: EventHandler,
}

/// In-process broadcast bus for textual events
///
/// Delivery is synchronous on the publisher's thread. Handlers are cloned out
/// of the subscription list before delivery, so they may publish or subscribe
/// themselves without deadlocking the bus.
pub struct EventBus {
    inner: Arc<Mutex<Vec<Subscription>>>,
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            inner: <_>::default(),
        }
    }
}

impl EventBus {
    /// Creates a new bus with no subscriptions
    pub fn new() -> Self {
        Self::default()
    }
    /// Subscribes a handler to the given topic
    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.lock().push(Subscription {
            topic: topic.into(),
            handler: Arc::new(handler),
        });
    }
    /// Delivers a payload to every handler subscribed to the topic
    pub fn publish(&self, topic: &str, payload: &str) {
        let targets: Vec<EventHandler> = self
            .inner
            .lock()
            .iter()
            .filter(|s| s.topic.as_ref() == topic)
            .map(|s| s.handler.clone())
            .collect();
        for handler in targets {
            handler(payload);
        }
    }
}
