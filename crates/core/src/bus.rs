//! In-process topic pub/sub (§4.H): subscription lists live under a single
//! lock, `publish` snapshots the list, releases the lock, then fans each
//! handler out as an independent task — it never awaits a handler and
//! never lets a handler panic reach the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

pub type Handler = Arc<dyn Fn(Value) + Send + Sync + 'static>;

#[derive(Default)]
struct Subscribers {
    by_topic: HashMap<String, Vec<Handler>>,
}

/// A process-local topic router. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<std::sync::Mutex<Subscribers>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { inner: Arc::new(std::sync::Mutex::new(Subscribers::default())) }
    }

    /// Register `handler` on `topic`. Topics are an open string namespace at
    /// this layer — callers that want the closed set from §3 should use the
    /// `Topic` enum's `as_str()`.
    pub fn subscribe(&self, topic: &str, handler: Handler) {
        let mut subs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        subs.by_topic.entry(topic.to_string()).or_default().push(handler);
    }

    /// Publish `payload` to every handler subscribed on `topic`. Schedules
    /// each handler as its own `tokio::spawn` task; never awaits them, and a
    /// handler panic is caught so it cannot propagate to other handlers or
    /// back to the publisher.
    pub fn publish(&self, topic: &str, payload: Value) {
        let handlers: Vec<Handler> = {
            let subs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match subs.by_topic.get(topic) {
                Some(hs) => hs.clone(),
                None => return,
            }
        };

        for handler in handlers {
            let payload = payload.clone();
            let topic = topic.to_string();
            tokio::spawn(async move {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(payload)));
                if let Err(_panic) = result {
                    warn!(topic = %topic, "bus handler panicked; swallowed");
                }
            });
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let subs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        subs.by_topic.get(topic).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            bus.subscribe("task.progress", Arc::new(move |_v| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        bus.publish("task.progress", serde_json::json!({"pct": 50}));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_does_not_panic() {
        let bus = EventBus::new();
        bus.publish("nobody.listens", serde_json::json!(null));
    }

    #[tokio::test]
    async fn handler_panic_is_swallowed() {
        let bus = EventBus::new();
        let after = Arc::new(AtomicUsize::new(0));
        bus.subscribe("x", Arc::new(|_v| panic!("boom")));
        let after2 = after.clone();
        bus.subscribe("x", Arc::new(move |_v| {
            after2.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish("x", serde_json::json!(null));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
