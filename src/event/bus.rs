//! Async pub/sub event bus.
//!
//! Delivery is at-least-once with no ordering guarantee across topics.
//! Handlers are dispatched fire-and-forget so a slow subscriber never blocks a
//! publisher. Subscriptions are explicit handles the owner releases on
//! shutdown; nothing is cleaned up implicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

/// An event as delivered to bus subscribers.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub id: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Subscriber callback. Use [`handler`] to build one from an async closure.
pub type EventHandler = Arc<dyn Fn(BusEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// A live subscription. Call [`SubscriptionHandle::release`] to stop delivery.
pub struct SubscriptionHandle {
    topic: String,
    subscriber_id: String,
    unsubscribe: Option<Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>>,
}

impl SubscriptionHandle {
    /// Build a handle around an unsubscribe closure.
    pub fn new(
        topic: impl Into<String>,
        subscriber_id: impl Into<String>,
        unsubscribe: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscriber_id: subscriber_id.into(),
            unsubscribe: Some(unsubscribe),
        }
    }

    /// Stop delivery. Idempotent via consumption.
    pub async fn release(mut self) {
        if let Some(unsub) = self.unsubscribe.take() {
            unsub().await;
            tracing::debug!(
                topic = %self.topic,
                subscriber = %self.subscriber_id,
                "subscription released"
            );
        }
    }
}

/// Async pub/sub surface consumed by the runtime.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload on a topic. Returns the event as recorded.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> BusEvent;

    /// Subscribe a named handler to a topic.
    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        handler: EventHandler,
    ) -> SubscriptionHandle;
}

struct Subscription {
    serial: u64,
    subscriber_id: String,
    handler: EventHandler,
}

struct BusInner {
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
    next_serial: AtomicU64,
}

/// In-process bus for single-host deployments and tests.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<BusInner>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(HashMap::new()),
                next_serial: AtomicU64::new(0),
            }),
        }
    }

    /// Number of live subscriptions across all topics (for shutdown checks).
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .expect("bus lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> BusEvent {
        let event = BusEvent {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            timestamp: Utc::now(),
            payload,
        };

        let handlers: Vec<EventHandler> = {
            let subs = self
                .inner
                .subscriptions
                .lock()
                .expect("bus lock poisoned");
            subs.get(topic)
                .map(|list| list.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };

        for h in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                h(event).await;
            });
        }

        event
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        handler: EventHandler,
    ) -> SubscriptionHandle {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);

        {
            let mut subs = self
                .inner
                .subscriptions
                .lock()
                .expect("bus lock poisoned");
            subs.entry(topic.to_string()).or_default().push(Subscription {
                serial,
                subscriber_id: subscriber_id.to_string(),
                handler,
            });
        }

        let inner = Arc::clone(&self.inner);
        let topic_owned = topic.to_string();
        SubscriptionHandle::new(
            topic,
            subscriber_id,
            Box::new(move || {
                Box::pin(async move {
                    let mut subs = inner.subscriptions.lock().expect("bus lock poisoned");
                    if let Some(list) = subs.get_mut(&topic_owned) {
                        list.retain(|s| s.serial != serial);
                        if list.is_empty() {
                            subs.remove(&topic_owned);
                        }
                    }
                })
            }),
        )
    }
}
