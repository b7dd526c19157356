// Roster (RFC 6121 section 2). Read-only mirror: request it, parse results and pushes.

use xmpp_parsers::Element;

use super::{custom_ns, NS_JABBER_CLIENT};
use crate::models::{RosterContact, RosterSubscription};

pub fn roster_request(id: &str) -> Element {
    let query = Element::builder("query", custom_ns::ROSTER).build();
    Element::builder("iq", NS_JABBER_CLIENT)
        .attr("type", "get")
        .attr("id", id)
        .append(query)
        .build()
}

/// A roster result replaces the mirror; a push only carries the items that changed.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterUpdate {
    Full(Vec<RosterContact>),
    Push(Vec<RosterContact>),
}

impl RosterUpdate {
    pub fn contacts(&self) -> &[RosterContact] {
        match self {
            RosterUpdate::Full(contacts) | RosterUpdate::Push(contacts) => contacts,
        }
    }

    /// Apply to a mirrored roster. Push items with `subscription="remove"` delete their jid.
    pub fn apply_to(&self, roster: &mut Vec<RosterContact>) {
        match self {
            RosterUpdate::Full(contacts) => *roster = contacts.clone(),
            RosterUpdate::Push(contacts) => {
                for contact in contacts {
                    roster.retain(|existing| !existing.jid.eq_ignore_ascii_case(&contact.jid));
                    if contact.subscription != RosterSubscription::Remove {
                        roster.push(contact.clone());
                    }
                }
            }
        }
    }
}

/// Roster result or push; None for any other stanza.
pub fn parse_roster(stanza: &Element) -> Option<RosterUpdate> {
    let push = match (stanza.name(), stanza.attr("type")) {
        ("iq", Some("result")) => false,
        ("iq", Some("set")) => true,
        _ => return None,
    };
    let query = stanza.get_child("query", custom_ns::ROSTER)?;

    let contacts = query
        .children()
        .filter(|item| item.name() == "item")
        .filter_map(|item| {
            let jid = item.attr("jid")?;
            Some(RosterContact {
                jid: jid.to_string(),
                name: item.attr("name").map(|n| n.to_string()),
                subscription: RosterSubscription::parse(item.attr("subscription")),
                groups: item
                    .children()
                    .filter(|g| g.name() == "group")
                    .map(|g| g.text())
                    .filter(|g| !g.is_empty())
                    .collect(),
            })
        })
        .collect();
    Some(if push {
        RosterUpdate::Push(contacts)
    } else {
        RosterUpdate::Full(contacts)
    })
}

/// RFC 6121 2.1.6: a push is only legitimate without `from` or from our own bare JID.
pub fn push_is_trusted(stanza: &Element, own_jid: &str) -> bool {
    match stanza.attr("from") {
        None => true,
        Some(from) => super::bare_jid(from).eq_ignore_ascii_case(super::bare_jid(own_jid)),
    }
}

/// Empty result acknowledging an iq request.
pub fn iq_result(request: &Element) -> Element {
    let mut builder = Element::builder("iq", NS_JABBER_CLIENT)
        .attr("type", "result")
        .attr("id", request.attr("id").unwrap_or(""));
    if let Some(from) = request.attr("from") {
        builder = builder.attr("to", from);
    }
    builder.build()
}
