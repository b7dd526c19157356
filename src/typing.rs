// Typing indicators with timeout-based expiry.
// Local state (our own typing) and remote state (what peers report) are kept
// apart: the first is broadcast outwards, the second is aggregated for display.

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::events::{EventBus, Subscription};
use crate::models::{ConversationKey, TypingState};

#[derive(Debug, Clone, PartialEq)]
pub enum TypingEvent {
    /// Our own typing state changed and should be sent to the peer.
    Outgoing(TypingState),
    /// A peer's typing state changed.
    Incoming(TypingState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

type EntryKey = (ConversationKey, String);

struct Entry {
    expires_at: Instant,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Tables {
    local: HashMap<EntryKey, Entry>,
    remote: HashMap<EntryKey, Entry>,
    next_generation: u64,
}

impl Tables {
    fn side(&mut self, side: Side) -> &mut HashMap<EntryKey, Entry> {
        match side {
            Side::Local => &mut self.local,
            Side::Remote => &mut self.remote,
        }
    }
}

struct Inner {
    tables: Mutex<Tables>,
    events: EventBus<TypingEvent>,
    timeout: Duration,
}

impl Inner {
    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, side: Side, state: TypingState) {
        let event = match side {
            Side::Local => TypingEvent::Outgoing(state),
            Side::Remote => TypingEvent::Incoming(state),
        };
        self.events.publish(&event);
    }
}

/// Tracks who is typing where. Each `(conversation, user)` pair has at most one
/// pending expiry timer; refreshing replaces it. Timers are tokio tasks, so calls
/// that start typing must happen inside a runtime.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    pub fn new(timeout: Duration) -> Self {
        PresenceTracker {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                events: EventBus::new(),
                timeout,
            }),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&TypingEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.events.subscribe(handler)
    }

    /// Our own typing state. Broadcasts immediately as `Outgoing`.
    pub fn set_typing(&self, key: &ConversationKey, user_id: &str, is_typing: bool) {
        self.update(Side::Local, key, user_id, is_typing);
    }

    /// A typing notification from a peer. Broadcasts immediately as `Incoming`.
    pub fn receive_typing(&self, key: &ConversationKey, user_id: &str, is_typing: bool) {
        self.update(Side::Remote, key, user_id, is_typing);
    }

    /// Remote users currently typing in `key`, sorted.
    pub fn typing_users(&self, key: &ConversationKey) -> Vec<String> {
        let tables = self.inner.tables();
        let mut users: Vec<String> = tables
            .remote
            .keys()
            .filter(|(k, _)| k == key)
            .map(|(_, user)| user.clone())
            .collect();
        users.sort();
        users
    }

    pub fn is_typing(&self, key: &ConversationKey, user_id: &str) -> bool {
        let entry_key = (key.clone(), user_id.to_string());
        let tables = self.inner.tables();
        tables.remote.contains_key(&entry_key) || tables.local.contains_key(&entry_key)
    }

    /// "alice is typing", "alice, bob are typing", or None when nobody is.
    pub fn display_string(&self, key: &ConversationKey, name_of: impl Fn(&str) -> String) -> Option<String> {
        let names: Vec<String> = self.typing_users(key).iter().map(|user| name_of(user)).collect();
        match names.len() {
            0 => None,
            1 => Some(format!("{} is typing", names[0])),
            _ => Some(format!("{} are typing", names.join(", "))),
        }
    }

    /// Number of pending expiry timers, local and remote.
    pub fn pending_timers(&self) -> usize {
        let tables = self.inner.tables();
        tables.local.len() + tables.remote.len()
    }

    /// Cancel every timer and forget all state without broadcasting.
    pub fn clear_all(&self) {
        let mut guard = self.inner.tables();
        let tables = &mut *guard;
        for (_, entry) in tables.local.drain().chain(tables.remote.drain()) {
            entry.timer.abort();
        }
    }

    fn update(&self, side: Side, key: &ConversationKey, user_id: &str, is_typing: bool) {
        let entry_key = (key.clone(), user_id.to_string());
        let now = Instant::now();
        let expires_at = if is_typing { now + self.inner.timeout } else { now };

        {
            let mut tables = self.inner.tables();
            if let Some(previous) = tables.side(side).remove(&entry_key) {
                previous.timer.abort();
            }
            if is_typing {
                tables.next_generation += 1;
                let generation = tables.next_generation;
                let timer = spawn_expiry(Arc::downgrade(&self.inner), side, entry_key.clone(), generation, expires_at);
                tables.side(side).insert(
                    entry_key.clone(),
                    Entry {
                        expires_at,
                        generation,
                        timer,
                    },
                );
            }
        }

        self.inner.publish(
            side,
            TypingState {
                conversation_key: entry_key.0,
                user_id: entry_key.1,
                is_typing,
                expires_at,
            },
        );
    }

    #[cfg(test)]
    fn expires_at(&self, key: &ConversationKey, user_id: &str) -> Option<Instant> {
        let entry_key = (key.clone(), user_id.to_string());
        let tables = self.inner.tables();
        tables
            .local
            .get(&entry_key)
            .or_else(|| tables.remote.get(&entry_key))
            .map(|entry| entry.expires_at)
    }
}

fn spawn_expiry(inner: Weak<Inner>, side: Side, entry_key: EntryKey, generation: u64, at: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(at).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let expired = {
            let mut tables = inner.tables();
            let current = tables.side(side).get(&entry_key).map(|entry| entry.generation);
            if current == Some(generation) {
                tables.side(side).remove(&entry_key);
                true
            } else {
                false
            }
        };
        if expired {
            debug!("Typing state for {} in {} expired", entry_key.1, entry_key.0);
            inner.publish(
                side,
                TypingState {
                    conversation_key: entry_key.0,
                    user_id: entry_key.1,
                    is_typing: false,
                    expires_at: at,
                },
            );
        }
    })
}
