// Client-side chat delivery: an XMPP live channel with a polling fallback over
// a durable store, feeding one deduplicated cache per conversation.

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod models;
pub mod polling;
pub mod session;
pub mod store;
pub mod typing;
pub mod xmpp;

// Re-export main types for convenience
pub use cache::MessageCache;
pub use config::{ChatConfig, Credentials, StoreConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ChatError, Result};
pub use events::{ChatEvent, EventBus, Subscription, TransportMode};
pub use models::*;
pub use polling::PollingFallback;
pub use session::{ChatSession, ChatSessionBuilder, SessionState};
pub use store::{HttpStore, MemoryStore, PersistentStore};
pub use typing::PresenceTracker;
pub use xmpp::{LiveChannel, XmppChannel};
