// XMPP connection management: connect, the client driver task, and disconnect.
//
// The tokio-xmpp client is owned by a single driver task. Outgoing stanzas
// reach it through an mpsc outbox and each carries a oneshot ack, so callers
// learn whether the hand-off to the stream succeeded.

use log::{debug, error, info, warn};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_xmpp::{AsyncClient as XMPPAsyncClient, BareJid as TokioBareJid, Event as XMPPEvent};
use futures_util::SinkExt; // For close() on AsyncClient
use futures_util::StreamExt; // For next() on AsyncClient
use xmpp_parsers::Element;

use super::{chat_states, custom_ns, message, presence, roster, LinkStatus, LiveEvent, XmppChannel, NS_JABBER_CLIENT};
use crate::config::Credentials;
use crate::error::{ChatError, Result};
use crate::events::EventBus;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum Outbound {
    Stanza(Element, oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<()>),
}

pub(crate) struct Link {
    outbox: mpsc::Sender<Outbound>,
    driver: JoinHandle<()>,
}

// Aborts a driver whose connect attempt was abandoned, including when the
// caller drops the `open` future.
struct DriverGuard(Option<JoinHandle<()>>);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if let Some(driver) = self.0.take() {
            driver.abort();
        }
    }
}

enum Step {
    Command(Option<Outbound>),
    Event(Option<XMPPEvent>),
}

impl XmppChannel {
    pub(crate) async fn open(&self, credentials: &Credentials) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.is_some() && self.connected.load(Ordering::SeqCst) {
            debug!("Already connected, skipping connect");
            return Ok(());
        }
        if let Some(stale) = link.take() {
            stale.driver.abort();
        }

        let full_jid = credentials.jid();
        let tokio_jid = TokioBareJid::from_str(&full_jid).map_err(|e| {
            error!("Failed to parse JID '{}': {}", full_jid, e);
            ChatError::InvalidJid(format!("{}: {}", full_jid, e))
        })?;
        if tokio_jid.node_str().is_none() {
            return Err(ChatError::InvalidJid(format!("Missing username part in '{}'", full_jid)));
        }
        let password = credentials
            .get_password()
            .ok_or_else(|| ChatError::AuthenticationFailed("no password supplied".into()))?;

        info!("Connecting to XMPP server as {}", full_jid);
        let client = XMPPAsyncClient::new(tokio_jid, password);
        let (outbox_tx, outbox_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut driver = DriverGuard(Some(tokio::spawn(drive(
            client,
            outbox_rx,
            self.events.clone(),
            self.connected.clone(),
            ready_tx,
            self.status_text.clone(),
            full_jid.clone(),
        ))));

        match tokio::time::timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!("Connected to XMPP server successfully");
                if let Some(driver) = driver.0.take() {
                    *link = Some(Link {
                        outbox: outbox_tx,
                        driver,
                    });
                }
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                error!("Failed to connect: {}", e);
                Err(e)
            }
            Ok(Err(_)) => Err(ChatError::TransportUnavailable("XMPP stream ended during connect".into())),
            Err(_) => {
                error!("Connection timed out after {:?}", self.connect_timeout);
                Err(ChatError::TransportUnavailable(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                )))
            }
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        let link = self.link.lock().await.take();
        let Some(link) = link else {
            debug!("No active connection to disconnect");
            return Ok(());
        };
        info!("Disconnecting from XMPP server");

        let (done_tx, done_rx) = oneshot::channel();
        if link.outbox.send(Outbound::Close(done_tx)).await.is_ok()
            && tokio::time::timeout(DISCONNECT_TIMEOUT, done_rx).await.is_err()
        {
            warn!("Timed out closing XMPP stream, aborting driver");
        }
        link.driver.abort();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Hand a stanza to the driver and wait for the stream to accept it.
    pub(crate) async fn dispatch(&self, stanza: Element) -> Result<()> {
        let outbox = {
            let link = self.link.lock().await;
            link.as_ref().map(|l| l.outbox.clone())
        }
        .ok_or_else(|| ChatError::SendFailed("not connected".into()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        outbox
            .send(Outbound::Stanza(stanza, ack_tx))
            .await
            .map_err(|_| ChatError::SendFailed("connection closed".into()))?;

        match tokio::time::timeout(self.send_timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::SendFailed("connection dropped mid-send".into())),
            Err(_) => Err(ChatError::SendFailed(format!("timed out after {:?}", self.send_timeout))),
        }
    }
}

async fn drive(
    mut client: XMPPAsyncClient,
    mut outbox: mpsc::Receiver<Outbound>,
    events: EventBus<LiveEvent>,
    connected: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<()>>,
    status_text: String,
    own_jid: String,
) {
    let mut ready = Some(ready);

    loop {
        let step = tokio::select! {
            command = outbox.recv() => Step::Command(command),
            event = client.next() => Step::Event(event),
        };

        match step {
            Step::Command(Some(Outbound::Stanza(stanza, ack))) => {
                let result = client
                    .send_stanza(stanza)
                    .await
                    .map_err(|e| ChatError::SendFailed(e.to_string()));
                let _ = ack.send(result);
            }
            Step::Command(Some(Outbound::Close(done))) => {
                if let Err(e) = client.send_stanza(presence::unavailable_presence()).await {
                    warn!("Failed to send unavailable presence: {}", e);
                }
                if let Err(e) = client.close().await {
                    error!("Error closing XMPP stream: {}", e);
                }
                connected.store(false, Ordering::SeqCst);
                events.publish(&LiveEvent::Status(LinkStatus::Closed));
                let _ = done.send(());
                break;
            }
            Step::Command(None) => {
                debug!("Outbox dropped, closing XMPP stream");
                let _ = client.close().await;
                connected.store(false, Ordering::SeqCst);
                break;
            }
            Step::Event(Some(XMPPEvent::Online { .. })) => {
                if let Some(ready) = ready.take() {
                    let result = announce(&mut client, &status_text).await;
                    let ok = result.is_ok();
                    let _ = ready.send(result);
                    if !ok {
                        break;
                    }
                }
                connected.store(true, Ordering::SeqCst);
                events.publish(&LiveEvent::Status(LinkStatus::Online));
            }
            Step::Event(Some(XMPPEvent::Disconnected(e))) => {
                match &e {
                    tokio_xmpp::Error::Auth(_) => error!("Authentication failed - check username and password"),
                    tokio_xmpp::Error::Io(io_err) => error!("Network error: {}", io_err),
                    other => error!("Connection error: {:?}", other),
                }
                connected.store(false, Ordering::SeqCst);
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(ChatError::from(e)));
                    }
                    None => events.publish(&LiveEvent::Status(LinkStatus::Offline)),
                }
                break;
            }
            Step::Event(Some(XMPPEvent::Stanza(stanza))) => {
                handle_stanza(&mut client, &stanza, &events, &own_jid).await;
            }
            Step::Event(None) => {
                error!("XMPP stream ended");
                connected.store(false, Ordering::SeqCst);
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(ChatError::TransportUnavailable("XMPP stream ended".into())));
                    }
                    None => events.publish(&LiveEvent::Status(LinkStatus::Offline)),
                }
                break;
            }
        }
    }
    debug!("XMPP driver task finished");
}

/// Initial presence and roster request, sent once the session is bound.
async fn announce(client: &mut XMPPAsyncClient, status_text: &str) -> Result<()> {
    client
        .send_stanza(presence::initial_presence(status_text))
        .await
        .map_err(|e| ChatError::TransportUnavailable(format!("initial presence: {}", e)))?;
    let id = uuid::Uuid::new_v4().to_string();
    client
        .send_stanza(roster::roster_request(&id))
        .await
        .map_err(|e| ChatError::TransportUnavailable(format!("roster request: {}", e)))?;
    Ok(())
}

async fn handle_stanza(client: &mut XMPPAsyncClient, stanza: &Element, events: &EventBus<LiveEvent>, own_jid: &str) {
    match stanza.name() {
        "message" => {
            if stanza.attr("type") == Some("error") {
                warn!("Received error message from {:?}", stanza.attr("from"));
                return;
            }
            if let Some(notice) = chat_states::parse_chat_state(stanza) {
                events.publish(&LiveEvent::ChatState(notice));
            }
            if let Some(live) = message::parse_message(stanza) {
                debug!("Received {} message {} from {}", live.kind.stanza_type(), live.id, live.from);
                events.publish(&LiveEvent::Message(live));
            }
        }
        "presence" => {
            if let Some(update) = presence::parse_presence(stanza) {
                events.publish(&LiveEvent::Presence(update));
            }
        }
        "iq" => handle_iq(client, stanza, events, own_jid).await,
        other => debug!("Ignoring {} stanza", other),
    }
}

async fn handle_iq(client: &mut XMPPAsyncClient, stanza: &Element, events: &EventBus<LiveEvent>, own_jid: &str) {
    let iq_type = stanza.attr("type").unwrap_or("");

    if let Some(update) = roster::parse_roster(stanza) {
        match update {
            roster::RosterUpdate::Full(ref contacts) => {
                info!("Received roster with {} contacts", contacts.len());
                events.publish(&LiveEvent::Roster(update));
            }
            roster::RosterUpdate::Push(_) if !roster::push_is_trusted(stanza, own_jid) => {
                warn!("Ignoring roster push from {:?}", stanza.attr("from"));
                reply(client, service_unavailable(stanza)).await;
            }
            roster::RosterUpdate::Push(ref contacts) => {
                debug!("Roster push with {} items", contacts.len());
                reply(client, roster::iq_result(stanza)).await;
                events.publish(&LiveEvent::Roster(update));
            }
        }
        return;
    }

    match iq_type {
        "get" if stanza.has_child("ping", custom_ns::PING) => {
            reply(client, roster::iq_result(stanza)).await;
        }
        "get" | "set" => {
            debug!("Unsupported iq request from {:?}", stanza.attr("from"));
            reply(client, service_unavailable(stanza)).await;
        }
        "error" => warn!("Received iq error for id {:?}", stanza.attr("id")),
        _ => debug!("Unhandled iq {:?}", stanza.attr("id")),
    }
}

async fn reply(client: &mut XMPPAsyncClient, stanza: Element) {
    if let Err(e) = client.send_stanza(stanza).await {
        warn!("Failed to reply to iq: {}", e);
    }
}

pub(crate) fn service_unavailable(request: &Element) -> Element {
    let condition = Element::builder("service-unavailable", custom_ns::STANZAS).build();
    let error = Element::builder("error", NS_JABBER_CLIENT)
        .attr("type", "cancel")
        .append(condition)
        .build();
    let mut builder = Element::builder("iq", NS_JABBER_CLIENT)
        .attr("type", "error")
        .attr("id", request.attr("id").unwrap_or(""));
    if let Some(from) = request.attr("from") {
        builder = builder.attr("to", from);
    }
    builder.append(error).build()
}
