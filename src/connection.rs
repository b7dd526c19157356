// Chooses which transport feeds a conversation.
//
// One live connect attempt is made at startup. If it fails the polling fallback
// takes over and stays active until the live channel reports itself online
// again or the caller reconnects by hand. The two paths are never active at
// the same time: polling is stopped before the manager reports Live, and
// started only after it has left Live. On the way back to Live one last
// refresh pulls whatever the store received since the previous tick.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::config::{ChatConfig, Credentials};
use crate::error::{ChatError, Result};
use crate::events::{EventBus, Subscription, TransportMode};
use crate::polling::PollingFallback;
use crate::xmpp::{LinkStatus, LiveChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Live,
    Degraded,
    Closed,
}

/// Room membership to hold while live. Direct conversations have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTarget {
    pub room_jid: String,
    pub nickname: String,
}

pub struct ConnectionManager {
    live: Arc<dyn LiveChannel>,
    polling: Arc<PollingFallback>,
    room: Option<RoomTarget>,
    connect_timeout: Duration,
    poll_interval: Duration,
    state: Mutex<ConnectionState>,
    connect_attempts: AtomicUsize,
    transitions: EventBus<TransportMode>,
    status_subscription: Mutex<Option<Subscription>>,
}

impl ConnectionManager {
    pub fn new(
        live: Arc<dyn LiveChannel>,
        polling: Arc<PollingFallback>,
        room: Option<RoomTarget>,
        config: &ChatConfig,
    ) -> Arc<Self> {
        Arc::new(ConnectionManager {
            live,
            polling,
            room,
            connect_timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
            state: Mutex::new(ConnectionState::Disconnected),
            connect_attempts: AtomicUsize::new(0),
            transitions: EventBus::new(),
            status_subscription: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_slot()
    }

    pub fn mode(&self) -> Option<TransportMode> {
        match self.state() {
            ConnectionState::Live => Some(TransportMode::Live),
            ConnectionState::Degraded => Some(TransportMode::Fallback),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    /// Number of `LiveChannel::connect` calls made by this manager.
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn polling(&self) -> &Arc<PollingFallback> {
        &self.polling
    }

    /// Notified after every switch between live and fallback delivery.
    pub fn on_transition(&self, handler: impl Fn(&TransportMode) + Send + Sync + 'static) -> Subscription {
        self.transitions.subscribe(handler)
    }

    /// One bounded connect attempt. Transport failures resolve to `Fallback`;
    /// only identity and configuration errors are returned.
    pub async fn initialize(self: &Arc<Self>, credentials: &Credentials) -> Result<TransportMode> {
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Closed => return Err(ChatError::SessionClosed),
            state => {
                debug!("Connection manager already initialized ({:?})", state);
                return self.mode().ok_or(ChatError::NotInitialized);
            }
        }
        self.set_state(ConnectionState::Connecting);
        self.watch_link();

        match self.establish(credentials).await {
            Ok(()) => {
                self.enter_live();
                Ok(TransportMode::Live)
            }
            Err(e) if e.is_fatal() => {
                error!("Live connection refused: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
            Err(e) => {
                warn!("Live channel unavailable, falling back to polling: {}", e);
                self.enter_degraded();
                Ok(TransportMode::Fallback)
            }
        }
    }

    /// Manual reconnect. On success polling is stopped and the store drained once
    /// before the room is re-joined.
    pub async fn reconnect(self: &Arc<Self>, credentials: &Credentials) -> Result<TransportMode> {
        let previous = self.state();
        match previous {
            ConnectionState::Live => return Ok(TransportMode::Live),
            ConnectionState::Degraded => {}
            ConnectionState::Closed => return Err(ChatError::SessionClosed),
            ConnectionState::Connecting => {
                debug!("Live channel is already being restored");
                return Ok(TransportMode::Fallback);
            }
            ConnectionState::Disconnected => return Err(ChatError::NotInitialized),
        }
        info!("Attempting manual reconnect");
        self.set_state(ConnectionState::Connecting);

        match self.connect_live(credentials).await {
            Ok(()) => {
                self.catch_up().await;
                if self.state() == ConnectionState::Closed {
                    return Err(ChatError::SessionClosed);
                }
                if let Err(e) = self.join().await {
                    warn!("Reconnected but could not re-join room: {}", e);
                    self.resume_polling();
                    return Ok(TransportMode::Fallback);
                }
                self.enter_live();
                Ok(TransportMode::Live)
            }
            Err(e) => {
                warn!("Manual reconnect failed: {}", e);
                self.set_state(previous);
                if e.is_fatal() {
                    Err(e)
                } else {
                    Ok(TransportMode::Fallback)
                }
            }
        }
    }

    /// Terminal. Leaves the room, and disconnects the channel when `owns_connection`.
    pub async fn disconnect(&self, owns_connection: bool) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.set_state(ConnectionState::Closed);
        if let Some(subscription) = self.status_slot().take() {
            subscription.unsubscribe();
        }
        self.polling.stop();

        if self.live.is_connected() {
            if let Some(room) = &self.room {
                if let Err(e) = self.live.leave_room(&room.room_jid, &room.nickname).await {
                    warn!("Failed to leave room {}: {}", room.room_jid, e);
                }
            }
        }
        if owns_connection {
            self.live.disconnect().await?;
        }
        info!("Connection manager closed");
        Ok(())
    }

    async fn establish(&self, credentials: &Credentials) -> Result<()> {
        self.connect_live(credentials).await?;
        self.join().await
    }

    async fn connect_live(&self, credentials: &Credentials) -> Result<()> {
        if self.live.is_connected() {
            debug!("Live channel already connected, reusing it");
            return Ok(());
        }
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        match tokio::time::timeout(self.connect_timeout, self.live.connect(credentials)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::TransportUnavailable(format!(
                "connect timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }

    async fn join(&self) -> Result<()> {
        match &self.room {
            Some(room) => self.live.join_room(&room.room_jid, &room.nickname).await,
            None => Ok(()),
        }
    }

    // Stop the timer, then drain the store once while ingest still follows polling.
    async fn catch_up(&self) {
        self.polling.stop();
        match self.polling.refresh().await {
            Ok(0) => {}
            Ok(n) => info!("Caught up on {} stored messages before going live", n),
            Err(e) => warn!("Final poll before going live failed: {}", e),
        }
    }

    // Back to Degraded without announcing a transition; callers were never told we left it.
    fn resume_polling(&self) {
        self.set_state(ConnectionState::Degraded);
        self.polling.start(self.poll_interval);
    }

    async fn restore_live(self: Arc<Self>) {
        self.catch_up().await;
        if self.state() != ConnectionState::Connecting {
            debug!("Link restore abandoned in state {:?}", self.state());
            return;
        }
        if !self.live.is_connected() {
            warn!("Live channel dropped again during catch-up");
            self.resume_polling();
            return;
        }
        if let Err(e) = self.join().await {
            warn!("Failed to re-join room after link restored: {}", e);
        }
        if self.state() == ConnectionState::Connecting {
            self.enter_live();
        }
    }

    fn enter_live(&self) {
        self.polling.stop();
        self.set_state(ConnectionState::Live);
        info!("Delivering over the live channel");
        self.transitions.publish(&TransportMode::Live);
    }

    fn enter_degraded(&self) {
        self.set_state(ConnectionState::Degraded);
        if self.polling.start(self.poll_interval) {
            info!("Polling fallback active");
        }
        self.transitions.publish(&TransportMode::Fallback);
    }

    fn watch_link(self: &Arc<Self>) {
        let mut slot = self.status_slot();
        if slot.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(self.live.on_status(Arc::new(move |status: LinkStatus| {
            if let Some(manager) = weak.upgrade() {
                manager.on_link_status(status);
            }
        })));
    }

    fn on_link_status(self: &Arc<Self>, status: LinkStatus) {
        match (status, self.state()) {
            (LinkStatus::Online, ConnectionState::Degraded) => {
                info!("Live channel is back online");
                self.set_state(ConnectionState::Connecting);
                tokio::spawn(self.clone().restore_live());
            }
            (LinkStatus::Offline, ConnectionState::Live) => {
                warn!("Live channel dropped, switching to polling");
                self.enter_degraded();
            }
            (status, state) => debug!("Ignoring link status {:?} in state {:?}", status, state),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state_slot();
        if *state != next {
            debug!("Connection state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn state_slot(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status_slot(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.status_subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
