use agentos_core::Event;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use tracing::debug;
use uuid::Uuid;

/// Callback invoked for each event delivered to a subscription.
///
/// A handler is never re-entered by its own subscription: events are handed
/// to it one at a time, in publish order per publisher. Handlers of different
/// subscriptions run concurrently.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one delivered event.
    async fn handle(&self, event: Event);
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, event: Event) {
        (self.f)(event).await;
    }
}

/// Drops events whose id was already handled.
///
/// Remembers the last `capacity` ids; older ids are forgotten in insertion
/// order.
pub struct IdempotentHandler<H> {
    inner: H,
    capacity: usize,
    seen: Mutex<SeenIds>,
}

struct SeenIds {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl<H: EventHandler> IdempotentHandler<H> {
    /// Wrap `inner`, remembering the last `capacity` event ids.
    pub fn new(inner: H, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            seen: Mutex::new(SeenIds {
                ids: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Record `id`; returns false if it was already recorded.
    fn first_sighting(&self, id: Uuid) -> bool {
        let mut seen = self.seen.lock();
        if !seen.ids.insert(id) {
            return false;
        }
        seen.order.push_back(id);
        while seen.order.len() > self.capacity {
            if let Some(old) = seen.order.pop_front() {
                seen.ids.remove(&old);
            }
        }
        true
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for IdempotentHandler<H> {
    async fn handle(&self, event: Event) {
        if !self.first_sighting(event.id) {
            debug!(event_id = %event.id, topic = %event.topic, "Duplicate event dropped");
            return;
        }
        self.inner.handle(event).await;
    }
}
