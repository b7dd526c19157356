// Common test utilities for integration tests
// A scriptable live channel, stores with injected failures, and small helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::LevelFilter;

use chatlink::config::{ChatConfig, Credentials};
use chatlink::error::{ChatError, Result};
use chatlink::events::{ChatEvent, EventBus};
use chatlink::models::{
    Conversation, DeliveryStatus, LiveMessage, Message, MessageKind, NewMessage, OutgoingMessage,
    PersistedMessage, PresenceShow, Profile,
};
use chatlink::session::ChatSession;
use chatlink::store::{ListQuery, MemoryStore, PersistentStore};
use chatlink::xmpp::{ChatState, ChatStateNotice, LinkStatus, LiveChannel, LiveEvent};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub const ROOM_JID: &str = "r123@conference.example.org";

pub fn credentials() -> Credentials {
    Credentials::new("example.org", "alice", "secret")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    /// Never resolves; the caller's timeout decides.
    Hang,
    Fail,
    RejectAuth,
}

/// In-process stand-in for the XMPP channel.
pub struct FakeLiveChannel {
    events: EventBus<LiveEvent>,
    behavior: Mutex<ConnectBehavior>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub joined: Mutex<Vec<String>>,
    pub left: Mutex<Vec<String>>,
    pub chat_states: Mutex<Vec<(String, ChatState)>>,
}

impl FakeLiveChannel {
    pub fn new(behavior: ConnectBehavior) -> Arc<Self> {
        Arc::new(FakeLiveChannel {
            events: EventBus::new(),
            behavior: Mutex::new(behavior),
            connected: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
            left: Mutex::new(Vec::new()),
            chat_states: Mutex::new(Vec::new()),
        })
    }

    /// Already connected, as another session's channel would be.
    pub fn connected() -> Arc<Self> {
        let channel = Self::new(ConnectBehavior::Succeed);
        channel.connected.store(true, Ordering::SeqCst);
        channel
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn subscribers(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn deliver(&self, event: LiveEvent) {
        self.events.publish(&event);
    }

    pub fn deliver_room_message(&self, id: &str, nick: &str, body: &str) {
        self.deliver(LiveEvent::Message(LiveMessage {
            id: id.to_string(),
            from: format!("{}/{}", ROOM_JID, nick),
            to: Some("alice@example.org/chatlink".to_string()),
            kind: MessageKind::Room,
            body: body.to_string(),
            delay: None,
        }));
    }

    pub fn deliver_room_typing(&self, nick: &str, state: ChatState) {
        self.deliver(LiveEvent::ChatState(ChatStateNotice {
            from: format!("{}/{}", ROOM_JID, nick),
            kind: MessageKind::Room,
            state,
        }));
    }

    /// Simulate the server dropping the stream.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.deliver(LiveEvent::Status(LinkStatus::Offline));
    }

    pub fn restore_link(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.deliver(LiveEvent::Status(LinkStatus::Online));
    }
}

#[async_trait]
impl LiveChannel for FakeLiveChannel {
    async fn connect(&self, _credentials: &Credentials) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            ConnectBehavior::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                self.deliver(LiveEvent::Status(LinkStatus::Online));
                Ok(())
            }
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Fail => Err(ChatError::TransportUnavailable("connection refused".into())),
            ConnectBehavior::RejectAuth => Err(ChatError::AuthenticationFailed("not-authorized".into())),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn join_room(&self, room_jid: &str, nickname: &str) -> Result<()> {
        self.joined.lock().unwrap().push(format!("{}/{}", room_jid, nickname));
        Ok(())
    }

    async fn leave_room(&self, room_jid: &str, nickname: &str) -> Result<()> {
        self.left.lock().unwrap().push(format!("{}/{}", room_jid, nickname));
        Ok(())
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::SendFailed("stream closed".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn send_presence(&self, _show: Option<PresenceShow>, _status: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn send_chat_state(&self, to: &str, _kind: MessageKind, state: ChatState) -> Result<()> {
        self.chat_states.lock().unwrap().push((to.to_string(), state));
        Ok(())
    }

    async fn request_roster(&self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> &EventBus<LiveEvent> {
        &self.events
    }
}

/// Reads work, every write fails.
#[derive(Default)]
pub struct FailingWriteStore {
    pub inner: MemoryStore,
    pub attempts: AtomicUsize,
}

#[async_trait]
impl PersistentStore for FailingWriteStore {
    async fn create_message(&self, _conversation_key: &str, _payload: NewMessage) -> Result<PersistedMessage> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ChatError::PersistenceFailed("store is read-only".into()))
    }

    async fn list_messages(&self, conversation_key: &str, query: ListQuery) -> Result<Vec<PersistedMessage>> {
        self.inner.list_messages(conversation_key, query).await
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.inner.get_user_profile(user_id).await
    }

    async fn update_delivery_status(&self, _key: &str, _id: &str, _status: DeliveryStatus) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ChatError::PersistenceFailed("store is read-only".into()))
    }
}

pub fn doc(key: &str, id: &str, sender: &str, body: &str, secs: i64) -> PersistedMessage {
    PersistedMessage {
        id: id.to_string(),
        conversation_key: key.to_string(),
        sender_id: sender.to_string(),
        body: body.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs),
        delivery_status: None,
    }
}

pub fn room_session(live: Arc<FakeLiveChannel>, store: Arc<dyn PersistentStore>) -> ChatSession {
    ChatSession::builder()
        .live_channel(live)
        .store(store)
        .credentials(credentials())
        .conversation(Conversation::room("R123"))
        .config(ChatConfig::default())
        .build()
        .unwrap()
}

/// Every message handed to `subscribe`, in delivery order.
pub fn record_messages(session: &ChatSession) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _ = session.subscribe(move |message| sink.lock().unwrap().push(message.clone()));
    seen
}

pub fn record_events(session: &ChatSession) -> Arc<Mutex<Vec<ChatEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _ = session.subscribe_events(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

/// Let spawned tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
