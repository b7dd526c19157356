use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Where a cached message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    Live,
    Persisted,
    Optimistic,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,      // Handed to a transport (or created optimistically)
    Delivered, // Received by this client, or acknowledged by the peer
    Read,      // Read by recipient
    Failed,    // Live send rejected
}

impl DeliveryStatus {
    /// Statuses only move forward: sent -> delivered -> read, or sent -> failed.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Sent, Delivered) | (Sent, Read) | (Delivered, Read) | (Sent, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Canonical message shape held by the cache and handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_key: String,
    pub sender_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub origin: MessageOrigin,
    pub delivery_status: DeliveryStatus,
}

impl Message {
    /// Build an optimistic message with a fresh client-assigned id.
    pub fn optimistic(conversation_key: &ConversationKey, sender_id: &str, body: &str) -> Self {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_key: conversation_key.as_str().to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            origin: MessageOrigin::Optimistic,
            delivery_status: DeliveryStatus::Sent,
        }
    }

    /// Normalize a live stanza. `received_at` is used when the stanza carries no delay stamp.
    pub fn from_live(
        live: LiveMessage,
        conversation_key: &ConversationKey,
        sender_id: String,
        received_at: DateTime<Utc>,
    ) -> Self {
        Message {
            id: live.id,
            conversation_key: conversation_key.as_str().to_string(),
            sender_id,
            body: live.body,
            timestamp: live.delay.unwrap_or(received_at),
            origin: MessageOrigin::Live,
            delivery_status: DeliveryStatus::Delivered,
        }
    }
}

impl From<PersistedMessage> for Message {
    fn from(doc: PersistedMessage) -> Self {
        Message {
            id: doc.id,
            conversation_key: doc.conversation_key,
            sender_id: doc.sender_id,
            body: doc.body,
            timestamp: doc.created_at,
            origin: MessageOrigin::Persisted,
            delivery_status: doc.delivery_status.unwrap_or(DeliveryStatus::Sent),
        }
    }
}

/// Message kinds on the live protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Direct,
    Room,
}

impl MessageKind {
    pub fn stanza_type(&self) -> &'static str {
        match self {
            MessageKind::Direct => "chat",
            MessageKind::Room => "groupchat",
        }
    }

    pub fn from_stanza_type(value: &str) -> Option<Self> {
        match value {
            "chat" | "normal" => Some(MessageKind::Direct),
            "groupchat" => Some(MessageKind::Room),
            _ => None,
        }
    }
}

/// A message as it arrives from the live channel, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMessage {
    pub id: String,
    pub from: String,
    pub to: Option<String>,
    pub kind: MessageKind,
    pub body: String,
    pub delay: Option<DateTime<Utc>>,
}

/// A message document as stored by the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub id: String,
    pub conversation_key: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
}

/// Payload for `PersistentStore::create_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
}

impl From<&Message> for NewMessage {
    fn from(message: &Message) -> Self {
        NewMessage {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            body: message.body.clone(),
            created_at: message.timestamp,
            delivery_status: message.delivery_status,
        }
    }
}

/// Outgoing live message handed to `LiveChannel::send`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub id: String,
    pub to: String,
    pub body: String,
    pub kind: MessageKind,
}

/// Identifies a conversation: a room id, or a deterministic key for a user pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn room(room_id: &str) -> Self {
        ConversationKey(room_id.to_string())
    }

    /// Same result whichever party computes it.
    pub fn direct(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = Sha256::new();
        hasher.update(first.as_bytes());
        hasher.update(b"\n");
        hasher.update(second.as_bytes());
        let digest = hex::encode(hasher.finalize());
        ConversationKey(format!("dm-{}", &digest[..32]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a session talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversation {
    Room { room_id: String },
    Direct { peer_id: String },
}

impl Conversation {
    pub fn room(room_id: impl Into<String>) -> Self {
        Conversation::Room { room_id: room_id.into() }
    }

    pub fn direct(peer_id: impl Into<String>) -> Self {
        Conversation::Direct { peer_id: peer_id.into() }
    }

    pub fn key(&self, self_id: &str) -> ConversationKey {
        match self {
            Conversation::Room { room_id } => ConversationKey::room(room_id),
            Conversation::Direct { peer_id } => ConversationKey::direct(self_id, peer_id),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Conversation::Room { .. } => MessageKind::Room,
            Conversation::Direct { .. } => MessageKind::Direct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceShow {
    Away,
    Chat,
    Dnd,
    Xa,
}

impl PresenceShow {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "away" => Some(PresenceShow::Away),
            "chat" => Some(PresenceShow::Chat),
            "dnd" => Some(PresenceShow::Dnd),
            "xa" => Some(PresenceShow::Xa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceShow::Away => "away",
            PresenceShow::Chat => "chat",
            PresenceShow::Dnd => "dnd",
            PresenceShow::Xa => "xa",
        }
    }
}

/// Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceState {
    pub user_id: String,
    pub available: bool,
    pub show: Option<PresenceShow>,
    pub status: Option<String>,
    pub priority: Option<i8>,
}

impl PresenceState {
    pub fn available(user_id: &str) -> Self {
        PresenceState {
            user_id: user_id.to_string(),
            available: true,
            show: None,
            status: None,
            priority: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypingState {
    pub conversation_key: ConversationKey,
    pub user_id: String,
    pub is_typing: bool,
    pub expires_at: tokio::time::Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterSubscription {
    None,
    To,
    From,
    Both,
    Remove,
}

impl RosterSubscription {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("to") => RosterSubscription::To,
            Some("from") => RosterSubscription::From,
            Some("both") => RosterSubscription::Both,
            Some("remove") => RosterSubscription::Remove,
            _ => RosterSubscription::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterContact {
    pub jid: String,
    pub name: Option<String>,
    pub subscription: RosterSubscription,
    pub groups: Vec<String>,
}

/// Display attribution fetched from the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}
