// XMPP Presence handling (RFC 6121) and room membership (XEP-0045).
// Joining and leaving a room is presence addressed to room@service/nickname.

use log::{debug, info};
use xmpp_parsers::Element;

use super::{custom_ns, NS_JABBER_CLIENT};
use crate::models::PresenceShow;

/// A presence stanza as received. `from` is the full JID.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePresence {
    pub from: String,
    pub available: bool,
    pub show: Option<PresenceShow>,
    pub status: Option<String>,
    pub priority: Option<i8>,
}

fn text_child(name: &str, text: &str) -> Element {
    let mut child = Element::builder(name, NS_JABBER_CLIENT).build();
    child.append_text_node(text);
    child
}

pub fn initial_presence(status_text: &str) -> Element {
    presence_with(Some(PresenceShow::Chat), Some(status_text))
}

pub fn presence_with(show: Option<PresenceShow>, status: Option<&str>) -> Element {
    let mut presence = Element::builder("presence", NS_JABBER_CLIENT).build();
    if let Some(show) = show {
        presence.append_child(text_child("show", show.as_str()));
    }
    if let Some(status) = status {
        presence.append_child(text_child("status", status));
    }
    presence
}

pub fn unavailable_presence() -> Element {
    Element::builder("presence", NS_JABBER_CLIENT)
        .attr("type", "unavailable")
        .build()
}

/// Join presence. No room history is requested: history comes from the durable store.
pub fn muc_join(occupant_jid: &str) -> Element {
    let history = Element::builder("history", custom_ns::MUC)
        .attr("maxstanzas", "0")
        .build();
    let muc = Element::builder("x", custom_ns::MUC).append(history).build();
    Element::builder("presence", NS_JABBER_CLIENT)
        .attr("to", occupant_jid)
        .append(muc)
        .build()
}

pub fn muc_leave(occupant_jid: &str) -> Element {
    Element::builder("presence", NS_JABBER_CLIENT)
        .attr("to", occupant_jid)
        .attr("type", "unavailable")
        .build()
}

/// Availability updates only; subscription management stanzas are logged and dropped.
pub fn parse_presence(stanza: &Element) -> Option<LivePresence> {
    if stanza.name() != "presence" {
        return None;
    }
    let from = stanza.attr("from")?;

    let available = match stanza.attr("type") {
        None | Some("available") => true,
        Some("unavailable") => false,
        Some(kind @ ("subscribe" | "subscribed" | "unsubscribe" | "unsubscribed")) => {
            info!("Received {} presence from {}", kind, from);
            return None;
        }
        Some(other) => {
            debug!("Ignoring presence of type '{}' from {}", other, from);
            return None;
        }
    };

    let show = stanza
        .get_child("show", NS_JABBER_CLIENT)
        .and_then(|s| PresenceShow::parse(&s.text()));
    let status = stanza
        .get_child("status", NS_JABBER_CLIENT)
        .map(|s| s.text())
        .filter(|s| !s.is_empty());
    let priority = stanza
        .get_child("priority", NS_JABBER_CLIENT)
        .and_then(|p| p.text().trim().parse::<i8>().ok());

    Some(LivePresence {
        from: from.to_string(),
        available,
        show,
        status,
        priority,
    })
}
