// Live protocol channel.
// `LiveChannel` is the seam the connection manager and sessions depend on;
// `XmppChannel` implements it over tokio-xmpp. Stanza building and parsing
// is split by concern, one submodule each.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

use crate::config::{ChatConfig, Credentials};
use crate::error::Result;
use crate::events::{EventBus, Subscription};
use crate::models::{LiveMessage, MessageKind, OutgoingMessage, PresenceShow};

pub mod chat_states;
pub mod connection;
pub mod message;
pub mod presence;
pub mod roster;

pub use chat_states::{ChatState, ChatStateNotice};
pub use presence::LivePresence;
pub use roster::RosterUpdate;

pub mod custom_ns {
    pub const CHATSTATES: &str = "http://jabber.org/protocol/chatstates";
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    pub const ROSTER: &str = "jabber:iq:roster";
    pub const DELAY: &str = "urn:xmpp:delay";
    pub const SID: &str = "urn:xmpp:sid:0";
    pub const HINTS: &str = "urn:xmpp:hints";
    pub const PING: &str = "urn:xmpp:ping";
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
}

pub(crate) const NS_JABBER_CLIENT: &str = "jabber:client";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Online,
    /// The link dropped without being asked to.
    Offline,
    /// Closed by an explicit disconnect.
    Closed,
}

/// Everything the live channel emits.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Message(LiveMessage),
    Presence(LivePresence),
    Roster(RosterUpdate),
    ChatState(ChatStateNotice),
    Status(LinkStatus),
}

/// Low-latency push transport. Sends are at-most-once: a resolved send means
/// "handed to the transport", not "received by the peer". History is never
/// taken from this channel.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Establish the session, send initial presence and request the roster.
    async fn connect(&self, credentials: &Credentials) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Idempotent; calling again with the same arguments is safe.
    async fn join_room(&self, room_jid: &str, nickname: &str) -> Result<()>;

    /// Idempotent; leaving a room that was never joined is a no-op.
    async fn leave_room(&self, room_jid: &str, nickname: &str) -> Result<()>;

    async fn send(&self, message: &OutgoingMessage) -> Result<()>;

    async fn send_presence(&self, show: Option<PresenceShow>, status: Option<&str>) -> Result<()>;

    async fn send_chat_state(&self, to: &str, kind: MessageKind, state: ChatState) -> Result<()>;

    async fn request_roster(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn events(&self) -> &EventBus<LiveEvent>;

    fn on_message(&self, handler: Arc<dyn Fn(&LiveMessage) + Send + Sync>) -> Subscription {
        self.events().subscribe(move |event| {
            if let LiveEvent::Message(message) = event {
                handler(message);
            }
        })
    }

    fn on_presence(&self, handler: Arc<dyn Fn(&LivePresence) + Send + Sync>) -> Subscription {
        self.events().subscribe(move |event| {
            if let LiveEvent::Presence(presence) = event {
                handler(presence);
            }
        })
    }

    fn on_roster(&self, handler: Arc<dyn Fn(&RosterUpdate) + Send + Sync>) -> Subscription {
        self.events().subscribe(move |event| {
            if let LiveEvent::Roster(update) = event {
                handler(update);
            }
        })
    }

    fn on_chat_state(&self, handler: Arc<dyn Fn(&ChatStateNotice) + Send + Sync>) -> Subscription {
        self.events().subscribe(move |event| {
            if let LiveEvent::ChatState(notice) = event {
                handler(notice);
            }
        })
    }

    fn on_status(&self, handler: Arc<dyn Fn(LinkStatus) + Send + Sync>) -> Subscription {
        self.events().subscribe(move |event| {
            if let LiveEvent::Status(status) = event {
                handler(*status);
            }
        })
    }
}

/// `LiveChannel` over an XMPP client stream.
pub struct XmppChannel {
    events: EventBus<LiveEvent>,
    link: TokioMutex<Option<connection::Link>>,
    connected: Arc<AtomicBool>,
    joined_rooms: Mutex<HashSet<String>>,
    connect_timeout: Duration,
    send_timeout: Duration,
    status_text: String,
}

impl XmppChannel {
    pub fn new(config: &ChatConfig) -> Self {
        XmppChannel {
            events: EventBus::new(),
            link: TokioMutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            joined_rooms: Mutex::new(HashSet::new()),
            connect_timeout: config.connect_timeout(),
            send_timeout: config.send_timeout(),
            status_text: "Online using chatlink".to_string(),
        }
    }

    fn joined(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.joined_rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LiveChannel for XmppChannel {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        self.open(credentials).await
    }

    async fn disconnect(&self) -> Result<()> {
        let result = self.close().await;
        self.joined().clear();
        result
    }

    async fn join_room(&self, room_jid: &str, nickname: &str) -> Result<()> {
        let occupant = occupant_jid(room_jid, nickname);
        self.dispatch(presence::muc_join(&occupant)).await?;
        self.joined().insert(occupant.clone());
        log::info!("Joined room {} as {}", room_jid, nickname);
        Ok(())
    }

    async fn leave_room(&self, room_jid: &str, nickname: &str) -> Result<()> {
        let occupant = occupant_jid(room_jid, nickname);
        if !self.joined().contains(&occupant) {
            log::debug!("Not in room {}, nothing to leave", room_jid);
            return Ok(());
        }
        self.dispatch(presence::muc_leave(&occupant)).await?;
        self.joined().remove(&occupant);
        log::info!("Left room {}", room_jid);
        Ok(())
    }

    async fn send(&self, outgoing: &OutgoingMessage) -> Result<()> {
        self.dispatch(message::build_message(outgoing)).await
    }

    async fn send_presence(&self, show: Option<PresenceShow>, status: Option<&str>) -> Result<()> {
        self.dispatch(presence::presence_with(show, status)).await
    }

    async fn send_chat_state(&self, to: &str, kind: MessageKind, state: ChatState) -> Result<()> {
        self.dispatch(chat_states::build_chat_state(to, kind, state)).await
    }

    async fn request_roster(&self) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        self.dispatch(roster::roster_request(&id)).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> &EventBus<LiveEvent> {
        &self.events
    }
}

pub fn occupant_jid(room_jid: &str, nickname: &str) -> String {
    format!("{}/{}", room_jid, nickname)
}

/// `user@domain/resource` -> `user@domain`
pub fn bare_jid(jid: &str) -> &str {
    jid.split('/').next().unwrap_or(jid)
}

/// `user@domain/resource` -> `resource`
pub fn resource_part(jid: &str) -> Option<&str> {
    jid.split_once('/').map(|(_, resource)| resource).filter(|r| !r.is_empty())
}

/// `user@domain/resource` -> `user`
pub fn local_part(jid: &str) -> &str {
    let bare = bare_jid(jid);
    match bare.split_once('@') {
        Some((local, _)) => local,
        None => bare,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jid_helpers_split_parts() {
        assert_eq!(bare_jid("alice@example.org/phone"), "alice@example.org");
        assert_eq!(bare_jid("alice@example.org"), "alice@example.org");
        assert_eq!(resource_part("room@conference.example.org/bob"), Some("bob"));
        assert_eq!(resource_part("room@conference.example.org"), None);
        assert_eq!(resource_part("room@conference.example.org/"), None);
        assert_eq!(local_part("alice@example.org/phone"), "alice");
        assert_eq!(local_part("example.org"), "example.org");
    }

    #[tokio::test]
    async fn sends_fail_when_not_connected() {
        let channel = XmppChannel::new(&ChatConfig::default());
        assert!(!channel.is_connected());
        let err = channel
            .send(&OutgoingMessage {
                id: "1".into(),
                to: "bob@example.org".into(),
                body: "hi".into(),
                kind: MessageKind::Direct,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ChatError::SendFailed(_)));
    }

    #[tokio::test]
    async fn leaving_an_unjoined_room_is_a_no_op() {
        let channel = XmppChannel::new(&ChatConfig::default());
        channel.leave_room("room@conference.example.org", "alice").await.unwrap();
        channel.disconnect().await.unwrap();
    }
}
