// Public façade for one conversation: a room or a direct pair.
//
// A session owns its MessageCache, its PollingFallback and its typing timers.
// Everything that reaches the cache goes through `SessionShared::ingest`, which
// publishes a Message event only when the id was not already present.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::MessageCache;
use crate::config::{ChatConfig, Credentials};
use crate::connection::{ConnectionManager, ConnectionState, RoomTarget};
use crate::error::{ChatError, Result};
use crate::events::{ChatEvent, EventBus, Subscription, TransportMode};
use crate::models::{
    Conversation, ConversationKey, DeliveryStatus, LiveMessage, Message, MessageKind, NewMessage,
    OutgoingMessage, PersistedMessage, PresenceState, Profile, RosterContact,
};
use crate::polling::PollingFallback;
use crate::store::{ListQuery, PersistentStore};
use crate::typing::{PresenceTracker, TypingEvent};
use crate::xmpp::{self, ChatState, ChatStateNotice, LiveChannel, LivePresence, RosterUpdate};

const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Live,
    Degraded,
    Closing,
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct HistoryCursor {
    offset: usize,
    has_more: bool,
}

/// Where the conversation lives on the live channel.
struct Route {
    address: String,
    kind: MessageKind,
}

impl Route {
    /// Sender id for a stanza from `from`, or None if it belongs elsewhere.
    fn sender_of(&self, from: &str, kind: MessageKind) -> Option<String> {
        if kind != self.kind || !xmpp::bare_jid(from).eq_ignore_ascii_case(&self.address) {
            return None;
        }
        match kind {
            // Room messages without a nickname come from the room itself
            MessageKind::Room => xmpp::resource_part(from).map(|nick| nick.to_string()),
            MessageKind::Direct => Some(xmpp::local_part(from).to_string()),
        }
    }
}

struct SessionShared {
    key: ConversationKey,
    self_id: String,
    route: Route,
    store: Arc<dyn PersistentStore>,
    cache: Mutex<MessageCache>,
    events: EventBus<ChatEvent>,
    state: Mutex<SessionState>,
    mode: Mutex<Option<TransportMode>>,
    sent_ids: Mutex<HashSet<String>>,
    // None marks a lookup that is pending or found nothing
    profiles: Mutex<HashMap<String, Option<Profile>>>,
    presence: Mutex<HashMap<String, PresenceState>>,
    roster: Mutex<Vec<RosterContact>>,
}

impl SessionShared {
    fn mode(&self) -> Option<TransportMode> {
        *lock(&self.mode)
    }

    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!("Session {} state {:?} -> {:?}", self.key, *state, next);
            *state = next;
        }
    }

    /// Put into the cache and publish if new. The cache lock is released before
    /// subscribers run.
    fn ingest(self: &Arc<Self>, message: Message) -> bool {
        let inserted = lock(&self.cache).put(message.clone());
        if inserted {
            self.remember_sender(&message.sender_id);
            self.events.publish(&ChatEvent::Message(message));
        }
        inserted
    }

    fn set_status(&self, id: &str, status: DeliveryStatus) -> bool {
        let updated = lock(&self.cache).update_status(id, status);
        match updated {
            Some(message) => {
                self.events.publish(&ChatEvent::Delivery {
                    id: message.id,
                    status,
                });
                true
            }
            None => false,
        }
    }

    /// Fetch a profile for senders seen for the first time.
    fn remember_sender(self: &Arc<Self>, sender_id: &str) {
        if sender_id == self.self_id {
            return;
        }
        {
            let mut profiles = lock(&self.profiles);
            if profiles.contains_key(sender_id) {
                return;
            }
            profiles.insert(sender_id.to_string(), None);
        }
        let weak = Arc::downgrade(self);
        let sender_id = sender_id.to_string();
        tokio::spawn(async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match shared.store.get_user_profile(&sender_id).await {
                Ok(Some(profile)) => {
                    debug!("Loaded profile for {}", sender_id);
                    lock(&shared.profiles).insert(sender_id, Some(profile));
                }
                Ok(None) => debug!("No profile stored for {}", sender_id),
                Err(e) => warn!("Failed to load profile for {}: {}", sender_id, e),
            }
        });
    }

    fn display_name(&self, user_id: &str) -> String {
        lock(&self.profiles)
            .get(user_id)
            .and_then(|profile| profile.as_ref())
            .and_then(|profile| profile.display_name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }

    fn on_live_message(self: &Arc<Self>, live: &LiveMessage) {
        if self.mode() != Some(TransportMode::Live) {
            debug!("Dropping live message {} while not live", live.id);
            return;
        }
        let Some(sender_id) = self.route.sender_of(&live.from, live.kind) else {
            return;
        };
        if sender_id == self.self_id && lock(&self.sent_ids).contains(&live.id) {
            debug!("Skipping echo of our own message {}", live.id);
            return;
        }
        let message = Message::from_live(live.clone(), &self.key, sender_id, Utc::now());
        self.ingest(message);
    }

    fn on_persisted(self: &Arc<Self>, doc: PersistedMessage) {
        if self.mode() == Some(TransportMode::Live) {
            return;
        }
        self.ingest(Message::from(doc));
    }

    fn on_presence(&self, update: &LivePresence) {
        let user_id = if xmpp::bare_jid(&update.from).eq_ignore_ascii_case(&self.route.address)
            && self.route.kind == MessageKind::Room
        {
            match xmpp::resource_part(&update.from) {
                Some(nick) => nick.to_string(),
                None => return,
            }
        } else {
            xmpp::local_part(&update.from).to_string()
        };
        let state = PresenceState {
            user_id: user_id.clone(),
            available: update.available,
            show: update.show,
            status: update.status.clone(),
            priority: update.priority,
        };
        lock(&self.presence).insert(user_id, state.clone());
        self.events.publish(&ChatEvent::Presence(state));
    }

    fn on_roster(&self, update: &RosterUpdate) {
        let snapshot = {
            let mut roster = lock(&self.roster);
            update.apply_to(&mut roster);
            roster.clone()
        };
        self.events.publish(&ChatEvent::Roster(snapshot));
    }

    fn on_transition(&self, mode: TransportMode) {
        *lock(&self.mode) = Some(mode);
        if matches!(self.state(), SessionState::Live | SessionState::Degraded) {
            self.set_state(state_for(mode));
        }
        self.events.publish(&ChatEvent::Transport(mode));
    }
}

fn state_for(mode: TransportMode) -> SessionState {
    match mode {
        TransportMode::Live => SessionState::Live,
        TransportMode::Fallback => SessionState::Degraded,
    }
}

/// Configures and builds a `ChatSession`.
pub struct ChatSessionBuilder {
    live: Option<Arc<dyn LiveChannel>>,
    store: Option<Arc<dyn PersistentStore>>,
    credentials: Option<Credentials>,
    conversation: Option<Conversation>,
    config: ChatConfig,
    owns_connection: bool,
}

impl Default for ChatSessionBuilder {
    fn default() -> Self {
        ChatSessionBuilder {
            live: None,
            store: None,
            credentials: None,
            conversation: None,
            config: ChatConfig::default(),
            owns_connection: true,
        }
    }
}

impl ChatSessionBuilder {
    pub fn live_channel(mut self, live: Arc<dyn LiveChannel>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// A shared connection is left connected when the session closes.
    pub fn shared_connection(mut self, shared: bool) -> Self {
        self.owns_connection = !shared;
        self
    }

    pub fn build(self) -> Result<ChatSession> {
        let live = self.live.ok_or_else(|| ChatError::Config("a live channel is required".into()))?;
        let store = self.store.ok_or_else(|| ChatError::Config("a store is required".into()))?;
        let credentials = self
            .credentials
            .ok_or_else(|| ChatError::Config("credentials are required".into()))?;
        let conversation = self
            .conversation
            .ok_or_else(|| ChatError::Config("a conversation is required".into()))?;
        self.config.validate()?;

        let self_id = credentials.user_id().to_string();
        let key = conversation.key(&self_id);
        let (route, room) = match &conversation {
            Conversation::Room { room_id } => {
                let room_jid = format!(
                    "{}@{}",
                    room_id.to_lowercase(),
                    self.config.muc_service_for(credentials.domain())
                );
                let room = RoomTarget {
                    room_jid: room_jid.clone(),
                    nickname: self_id.clone(),
                };
                (
                    Route {
                        address: room_jid,
                        kind: MessageKind::Room,
                    },
                    Some(room),
                )
            }
            Conversation::Direct { peer_id } => {
                let address = if peer_id.contains('@') {
                    peer_id.clone()
                } else {
                    format!("{}@{}", peer_id, credentials.domain())
                };
                (
                    Route {
                        address,
                        kind: MessageKind::Direct,
                    },
                    None,
                )
            }
        };

        let shared = Arc::new(SessionShared {
            key: key.clone(),
            self_id,
            route,
            store: store.clone(),
            cache: Mutex::new(MessageCache::new()),
            events: EventBus::new(),
            state: Mutex::new(SessionState::Uninitialized),
            mode: Mutex::new(None),
            sent_ids: Mutex::new(HashSet::new()),
            profiles: Mutex::new(HashMap::new()),
            presence: Mutex::new(HashMap::new()),
            roster: Mutex::new(Vec::new()),
        });

        let sink_target: Weak<SessionShared> = Arc::downgrade(&shared);
        let polling = Arc::new(PollingFallback::new(
            store,
            key.as_str(),
            self.config.poll_page_limit,
            Arc::new(move |doc: PersistedMessage| {
                if let Some(shared) = sink_target.upgrade() {
                    shared.on_persisted(doc);
                }
            }),
        ));
        let manager = ConnectionManager::new(live.clone(), polling, room, &self.config);
        let typing = PresenceTracker::new(self.config.typing_timeout());

        let session = ChatSession {
            shared,
            live,
            manager,
            typing,
            credentials,
            config: self.config,
            owns_connection: self.owns_connection,
            subscriptions: Mutex::new(Vec::new()),
            pending_writes: Mutex::new(Vec::new()),
            history: Mutex::new(HistoryCursor::default()),
        };
        session.wire();
        Ok(session)
    }
}

pub struct ChatSession {
    shared: Arc<SessionShared>,
    live: Arc<dyn LiveChannel>,
    manager: Arc<ConnectionManager>,
    typing: PresenceTracker,
    credentials: Credentials,
    config: ChatConfig,
    owns_connection: bool,
    subscriptions: Mutex<Vec<Subscription>>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
    history: Mutex<HistoryCursor>,
}

impl ChatSession {
    pub fn builder() -> ChatSessionBuilder {
        ChatSessionBuilder::default()
    }

    // Hook the live channel, typing tracker and connection manager into the shared state.
    fn wire(&self) {
        let mut subscriptions = lock(&self.subscriptions);

        let weak = Arc::downgrade(&self.shared);
        subscriptions.push(self.live.on_message(Arc::new(move |live: &LiveMessage| {
            if let Some(shared) = weak.upgrade() {
                shared.on_live_message(live);
            }
        })));

        let weak = Arc::downgrade(&self.shared);
        subscriptions.push(self.live.on_presence(Arc::new(move |update: &LivePresence| {
            if let Some(shared) = weak.upgrade() {
                shared.on_presence(update);
            }
        })));

        let weak = Arc::downgrade(&self.shared);
        subscriptions.push(self.live.on_roster(Arc::new(move |update: &RosterUpdate| {
            if let Some(shared) = weak.upgrade() {
                shared.on_roster(update);
            }
        })));

        let weak = Arc::downgrade(&self.shared);
        let typing = self.typing.clone();
        subscriptions.push(self.live.on_chat_state(Arc::new(move |notice: &ChatStateNotice| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.mode() != Some(TransportMode::Live) {
                return;
            }
            let Some(user_id) = shared.route.sender_of(&notice.from, notice.kind) else {
                return;
            };
            // Rooms reflect our own chat states back to us
            if user_id == shared.self_id {
                return;
            }
            typing.receive_typing(&shared.key, &user_id, notice.state.is_typing());
        })));

        let weak = Arc::downgrade(&self.shared);
        let live = self.live.clone();
        subscriptions.push(self.typing.subscribe(move |event: &TypingEvent| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match event {
                TypingEvent::Outgoing(state) => {
                    shared.events.publish(&ChatEvent::Typing(state.clone()));
                    if shared.mode() == Some(TransportMode::Live) {
                        let live = live.clone();
                        let to = shared.route.address.clone();
                        let kind = shared.route.kind;
                        let chat_state = ChatState::from_typing(state.is_typing);
                        tokio::spawn(async move {
                            if let Err(e) = live.send_chat_state(&to, kind, chat_state).await {
                                debug!("Failed to send chat state to {}: {}", to, e);
                            }
                        });
                    }
                }
                TypingEvent::Incoming(state) => {
                    shared.events.publish(&ChatEvent::Typing(state.clone()));
                }
            }
        }));

        let weak = Arc::downgrade(&self.shared);
        subscriptions.push(self.manager.on_transition(move |mode: &TransportMode| {
            if let Some(shared) = weak.upgrade() {
                shared.on_transition(*mode);
            }
        }));
    }

    /// Seed history, then make the single live connect attempt.
    pub async fn initialize(&self) -> Result<TransportMode> {
        match self.state() {
            SessionState::Uninitialized => {}
            SessionState::Live => return Ok(TransportMode::Live),
            SessionState::Degraded => return Ok(TransportMode::Fallback),
            SessionState::Loading => return Err(ChatError::NotInitialized),
            SessionState::Closing | SessionState::Closed => return Err(ChatError::SessionClosed),
        }
        self.shared.set_state(SessionState::Loading);
        info!("Opening session for {}", self.shared.key);

        self.seed_history().await;

        match self.manager.initialize(&self.credentials).await {
            Ok(mode) => {
                *lock(&self.shared.mode) = Some(mode);
                self.shared.set_state(state_for(mode));
                info!("Session {} ready ({:?})", self.shared.key, mode);
                Ok(mode)
            }
            Err(e) => {
                error!("Session {} failed to start: {}", self.shared.key, e);
                self.shutdown().await;
                Err(e)
            }
        }
    }

    async fn seed_history(&self) {
        let query = ListQuery::new(self.config.initial_history_limit);
        match self.shared.store.list_messages(self.shared.key.as_str(), query).await {
            Ok(docs) => {
                debug!("Seeding {} messages for {}", docs.len(), self.shared.key);
                for doc in docs {
                    self.manager.polling().advance_cursor(doc.created_at);
                    self.shared.ingest(Message::from(doc));
                }
            }
            Err(e) => warn!("Could not load history for {}: {}", self.shared.key, e),
        }
    }

    /// Optimistic send. The live send is attempted only while live; the durable
    /// write always happens in the background and its failure is only logged.
    /// A rejected live send returns `SendFailed`, with the cached copy marked `Failed`.
    pub async fn send_message(&self, body: &str) -> Result<Message> {
        self.ensure_active()?;
        if body.trim().is_empty() {
            return Err(ChatError::InvalidMessage("message body is empty".into()));
        }

        let message = Message::optimistic(&self.shared.key, &self.shared.self_id, body);
        lock(&self.shared.sent_ids).insert(message.id.clone());
        self.shared.ingest(message.clone());
        self.persist(&message);

        if self.shared.mode() == Some(TransportMode::Live) {
            let outgoing = OutgoingMessage {
                id: message.id.clone(),
                to: self.shared.route.address.clone(),
                body: message.body.clone(),
                kind: self.shared.route.kind,
            };
            if let Err(e) = self.live.send(&outgoing).await {
                error!("Live send of {} failed: {}", message.id, e);
                self.shared.set_status(&message.id, DeliveryStatus::Failed);
                return Err(match e {
                    ChatError::SendFailed(reason) => ChatError::SendFailed(reason),
                    other => ChatError::SendFailed(other.to_string()),
                });
            }
        } else {
            debug!("Not live, {} goes through the store only", message.id);
        }
        Ok(message)
    }

    fn persist(&self, message: &Message) {
        let store = self.shared.store.clone();
        let key = self.shared.key.as_str().to_string();
        let payload = NewMessage::from(message);
        let handle = tokio::spawn(async move {
            let id = payload.id.clone();
            match store.create_message(&key, payload).await {
                Ok(_) => debug!("Persisted message {}", id),
                Err(e) => warn!("Failed to persist message {}: {}", id, e),
            }
        });
        let mut pending = lock(&self.pending_writes);
        pending.retain(|write| !write.is_finished());
        pending.push(handle);
    }

    async fn flush_writes(&self) {
        let writes = std::mem::take(&mut *lock(&self.pending_writes));
        for result in futures::future::join_all(writes).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("Background write panicked: {}", e);
                }
            }
        }
    }

    /// Next page of durable history, oldest first. Entries already in the cache
    /// are returned as the cache holds them.
    pub async fn get_history(&self, page_size: usize) -> Result<Vec<Message>> {
        self.ensure_active()?;
        self.flush_writes().await;

        let offset = lock(&self.history).offset;
        let docs = self
            .shared
            .store
            .list_messages(self.shared.key.as_str(), ListQuery::new(page_size).with_offset(offset))
            .await?;
        {
            let mut history = lock(&self.history);
            history.offset = offset + docs.len();
            history.has_more = docs.len() == page_size;
        }

        let mut page = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.id.clone();
            let persisted = Message::from(doc);
            self.shared.ingest(persisted.clone());
            let resolved = lock(&self.shared.cache).get(&id).cloned().unwrap_or(persisted);
            page.push(resolved);
        }
        Ok(page)
    }

    /// Whether the last history page was full.
    pub fn has_more(&self) -> bool {
        lock(&self.history).has_more
    }

    pub fn subscribe(&self, handler: impl Fn(&Message) + Send + Sync + 'static) -> Subscription {
        self.shared.events.subscribe(move |event| {
            if let ChatEvent::Message(message) = event {
                handler(message);
            }
        })
    }

    pub fn subscribe_events(&self, handler: impl Fn(&ChatEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.events.subscribe(handler)
    }

    /// Must be called from within the tokio runtime.
    pub fn set_typing(&self, is_typing: bool) {
        if self.ensure_active().is_err() {
            debug!("Ignoring typing update on inactive session");
            return;
        }
        self.typing.set_typing(&self.shared.key, &self.shared.self_id, is_typing);
    }

    /// Mark messages read locally, then persist each accepted transition.
    pub async fn mark_as_read(&self, ids: &[String]) -> Result<()> {
        self.ensure_active()?;
        for id in ids {
            if !self.shared.set_status(id, DeliveryStatus::Read) {
                debug!("Message {} is unknown or cannot become read", id);
                continue;
            }
            if let Err(e) = self
                .shared
                .store
                .update_delivery_status(self.shared.key.as_str(), id, DeliveryStatus::Read)
                .await
            {
                warn!("Failed to persist read status for {}: {}", id, e);
            }
        }
        Ok(())
    }

    /// Manual reconnect path; the only way a session retries the live channel.
    pub async fn reconnect(&self) -> Result<TransportMode> {
        self.ensure_active()?;
        let mode = self.manager.reconnect(&self.credentials).await?;
        *lock(&self.shared.mode) = Some(mode);
        self.shared.set_state(state_for(mode));
        Ok(mode)
    }

    pub async fn close(&self) -> Result<()> {
        match self.state() {
            SessionState::Closing | SessionState::Closed => return Ok(()),
            _ => {}
        }
        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.shared.set_state(SessionState::Closing);
        info!("Closing session {}", self.shared.key);

        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
        self.shared.events.clear();
        self.typing.clear_all();

        if tokio::time::timeout(CLOSE_WRITE_TIMEOUT, self.flush_writes())
            .await
            .is_err()
        {
            warn!("Timed out waiting for background writes");
        }
        if let Err(e) = self.manager.disconnect(self.owns_connection).await {
            warn!("Error while disconnecting: {}", e);
        }

        lock(&self.shared.cache).clear();
        *lock(&self.shared.mode) = None;
        self.shared.set_state(SessionState::Closed);
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            SessionState::Live | SessionState::Degraded => Ok(()),
            SessionState::Uninitialized | SessionState::Loading => Err(ChatError::NotInitialized),
            SessionState::Closing | SessionState::Closed => Err(ChatError::SessionClosed),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn mode(&self) -> Option<TransportMode> {
        self.shared.mode()
    }

    pub fn conversation_key(&self) -> &ConversationKey {
        &self.shared.key
    }

    pub fn user_id(&self) -> &str {
        &self.shared.self_id
    }

    /// Snapshot of the cache, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.shared.cache).all()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn display_name(&self, user_id: &str) -> String {
        self.shared.display_name(user_id)
    }

    pub fn typing_summary(&self) -> Option<String> {
        let shared = self.shared.clone();
        self.typing
            .display_string(&self.shared.key, move |user| shared.display_name(user))
    }

    pub fn presence_of(&self, user_id: &str) -> Option<PresenceState> {
        lock(&self.shared.presence).get(user_id).cloned()
    }

    pub fn roster(&self) -> Vec<RosterContact> {
        lock(&self.shared.roster).clone()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
        self.manager.polling().stop();
        self.typing.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(address: &str, kind: MessageKind) -> Route {
        Route {
            address: address.to_string(),
            kind,
        }
    }

    #[test]
    fn room_senders_are_nicknames() {
        let room = route("r123@conference.example.org", MessageKind::Room);
        assert_eq!(
            room.sender_of("R123@conference.example.org/bob", MessageKind::Room).as_deref(),
            Some("bob")
        );
        assert_eq!(room.sender_of("r123@conference.example.org", MessageKind::Room), None);
        assert_eq!(room.sender_of("other@conference.example.org/bob", MessageKind::Room), None);
        assert_eq!(room.sender_of("r123@conference.example.org/bob", MessageKind::Direct), None);
    }

    #[test]
    fn direct_senders_are_local_parts() {
        let direct = route("bob@example.org", MessageKind::Direct);
        assert_eq!(
            direct.sender_of("bob@example.org/phone", MessageKind::Direct).as_deref(),
            Some("bob")
        );
        assert_eq!(direct.sender_of("carol@example.org/phone", MessageKind::Direct), None);
    }

    #[test]
    fn build_requires_every_part() {
        let err = ChatSession::builder().build().err().unwrap();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
