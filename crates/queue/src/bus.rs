//! Typed publish/subscribe for [`QueueEvent`]s.
//!
//! Two ways to listen:
//! - [`EventBus::subscribe`] registers a synchronous handler for one kind and
//!   returns a [`Subscription`] that unregisters on drop.
//! - [`EventBus::channel`] hands out a `tokio::sync::broadcast` receiver for
//!   async consumers that want every event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::broadcast;

use crate::events::{EventKind, QueueEvent};

/// Broadcast channel capacity. Slow receivers see `Lagged` rather than
/// blocking publishers.
const CHANNEL_CAPACITY: usize = 256;

pub type EventHandler = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

struct Registration {
    id: u64,
    /// `None` = every kind.
    kind: Option<EventKind>,
    handler: EventHandler,
}

struct BusInner {
    handlers: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    channel: broadcast::Sender<QueueEvent>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.retain(|r| r.id != id);
    }
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                channel,
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register `handler` for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Receive every event published from now on.
    pub fn channel(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.channel.subscribe()
    }

    /// Deliver `event` to matching handlers, then to channel receivers.
    ///
    /// Handlers run on the publishing thread, outside any bus lock, so a
    /// handler may subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: QueueEvent) {
        let kind = event.kind();
        let targets: Vec<EventHandler> = {
            let handlers = self.inner.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers
                .iter()
                .filter(|r| r.kind.map_or(true, |k| k == kind))
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };

        for handler in targets {
            handler(&event);
        }

        // No receivers is not an error.
        let _ = self.inner.channel.send(event);
    }

    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn register(&self, kind: Option<EventKind>, handler: EventHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration { id, kind, handler });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: true,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ErrorEvent, TaskAdded};
    use std::sync::atomic::AtomicUsize;

    fn added(url: &str) -> QueueEvent {
        QueueEvent::TaskAdded(TaskAdded {
            url: url.into(),
            priority: 1,
        })
    }

    fn error(msg: &str) -> QueueEvent {
        QueueEvent::Error(ErrorEvent {
            message: msg.into(),
            url: None,
        })
    }

    #[test]
    fn handler_only_sees_its_kind() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _sub = bus.subscribe(EventKind::TaskAdded, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(added("/a"));
        bus.publish(error("nope"));
        bus.publish(added("/b"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscribe_all_sees_everything() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _sub = bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(added("/a"));
        bus.publish(error("nope"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus.subscribe(EventKind::TaskAdded, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(added("/a"));
        sub.unsubscribe();
        bus.publish(added("/b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn drop_unsubscribes_but_detach_keeps() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe(EventKind::Error, |_| {});
            assert_eq!(bus.handler_count(), 1);
        }
        assert_eq!(bus.handler_count(), 0);

        bus.subscribe(EventKind::Error, |_| {}).detach();
        assert_eq!(bus.handler_count(), 1);
    }

    #[test]
    fn handler_may_subscribe_during_publish() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let _sub = bus.subscribe(EventKind::TaskAdded, move |_| {
            inner_bus.subscribe(EventKind::Error, |_| {}).detach();
        });
        bus.publish(added("/a"));
        assert_eq!(bus.handler_count(), 2);
    }

    #[tokio::test]
    async fn channel_receives_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.channel();
        bus.publish(added("/a"));
        bus.publish(error("x"));

        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::TaskAdded);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Error);
    }
}
