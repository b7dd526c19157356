// Typed publish/subscribe used for live-channel events, typing updates and session events.
// Every subscription hands back a disposer.

use log::warn;
use std::sync::{Arc, Mutex, Weak};

use crate::models::{DeliveryStatus, Message, PresenceState, RosterContact, TypingState};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// Fan-out of events to any number of independent handlers.
pub struct EventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        EventBus {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handlers.push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                lock(&registry).handlers.retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Handlers run outside the registry lock, so they may subscribe or unsubscribe.
    pub fn publish(&self, event: &E) {
        let handlers: Vec<Handler<E>> = lock(&self.registry)
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).handlers.len()
    }

    pub fn clear(&self) {
        lock(&self.registry).handlers.clear();
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        EventBus {
            registry: self.registry.clone(),
        }
    }
}

fn lock<E>(registry: &Mutex<Registry<E>>) -> std::sync::MutexGuard<'_, Registry<E>> {
    registry.lock().unwrap_or_else(|poisoned| {
        warn!("Event registry lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Disposer returned by every `subscribe`. Dropping it leaves the handler registered.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Active delivery path of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Live,
    Fallback,
}

/// Everything a session publishes to its subscribers.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(Message),
    Presence(PresenceState),
    Roster(Vec<RosterContact>),
    Typing(TypingState),
    Delivery { id: String, status: DeliveryStatus },
    Transport(TransportMode),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_subscriber_receives_each_event() {
        let bus: EventBus<u32> = EventBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        let _a = bus.subscribe(move |v| {
            f.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let s = second.clone();
        let _b = bus.subscribe(move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
        });

        bus.publish(&2);
        bus.publish(&3);
        assert_eq!(first.load(Ordering::SeqCst), 5);
        assert_eq!(second.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let bus: EventBus<()> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let keep = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = hits.clone();
        let gone = bus.subscribe(move |_| {
            h.fetch_add(100, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(), 2);

        gone.unsubscribe();
        bus.publish(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 1);

        keep.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn disposer_outliving_the_bus_is_harmless() {
        let bus: EventBus<()> = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        sub.unsubscribe();
    }

    #[test]
    fn handler_may_subscribe_while_being_invoked() {
        let bus: EventBus<()> = EventBus::new();
        let inner = bus.clone();
        let _sub = bus.subscribe(move |_| {
            let _nested = inner.subscribe(|_| {});
        });
        bus.publish(&());
        assert_eq!(bus.subscriber_count(), 2);
    }
}
