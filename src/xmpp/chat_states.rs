// XEP-0085: Chat State Notifications Implementation
// https://xmpp.org/extensions/xep-0085.html

use xmpp_parsers::Element;

use super::{custom_ns, NS_JABBER_CLIENT};
use crate::models::MessageKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatState {
    Active,    // User is actively participating in the chat
    Composing, // User is composing a message
    Paused,    // User started composing but paused
    Inactive,  // User has not been active recently
    Gone,      // User has effectively ended their participation
}

const STATES: [ChatState; 5] = [
    ChatState::Active,
    ChatState::Composing,
    ChatState::Paused,
    ChatState::Inactive,
    ChatState::Gone,
];

impl ChatState {
    pub fn element_name(&self) -> &'static str {
        match self {
            ChatState::Active => "active",
            ChatState::Composing => "composing",
            ChatState::Paused => "paused",
            ChatState::Inactive => "inactive",
            ChatState::Gone => "gone",
        }
    }

    pub fn is_typing(&self) -> bool {
        matches!(self, ChatState::Composing)
    }

    pub fn from_typing(is_typing: bool) -> Self {
        if is_typing {
            ChatState::Composing
        } else {
            ChatState::Paused
        }
    }
}

/// A chat state received from a contact or room occupant.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatStateNotice {
    pub from: String,
    pub kind: MessageKind,
    pub state: ChatState,
}

pub fn build_chat_state(to: &str, kind: MessageKind, state: ChatState) -> Element {
    // Typing notifications are not worth archiving
    let no_store = Element::builder("no-store", custom_ns::HINTS).build();
    Element::builder("message", NS_JABBER_CLIENT)
        .attr("type", kind.stanza_type())
        .attr("to", to)
        .attr("id", uuid::Uuid::new_v4().to_string())
        .append(Element::builder(state.element_name(), custom_ns::CHATSTATES).build())
        .append(no_store)
        .build()
}

pub fn parse_chat_state(stanza: &Element) -> Option<ChatStateNotice> {
    let from = stanza.attr("from")?;
    let kind = MessageKind::from_stanza_type(stanza.attr("type").unwrap_or("normal"))?;
    let state = STATES
        .iter()
        .copied()
        .find(|state| stanza.has_child(state.element_name(), custom_ns::CHATSTATES))?;
    Some(ChatStateNotice {
        from: from.to_string(),
        kind,
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_maps_to_composing_and_paused() {
        assert_eq!(ChatState::from_typing(true), ChatState::Composing);
        assert_eq!(ChatState::from_typing(false), ChatState::Paused);
        assert!(ChatState::Composing.is_typing());
        assert!(!ChatState::Active.is_typing());
    }

    #[test]
    fn round_trips_through_a_stanza() {
        let stanza = build_chat_state("r1@conference.example.org", MessageKind::Room, ChatState::Composing);
        assert!(stanza.has_child("no-store", custom_ns::HINTS));

        let incoming: Element = r#"<message xmlns="jabber:client" type="groupchat" from="r1@conference.example.org/bob"><composing xmlns="http://jabber.org/protocol/chatstates"/></message>"#
            .parse()
            .unwrap();
        let notice = parse_chat_state(&incoming).unwrap();
        assert_eq!(notice.from, "r1@conference.example.org/bob");
        assert_eq!(notice.kind, MessageKind::Room);
        assert_eq!(notice.state, ChatState::Composing);
    }

    #[test]
    fn messages_without_chat_state_yield_none() {
        let plain: Element = r#"<message xmlns="jabber:client" type="chat" from="bob@example.org"><body>hi</body></message>"#
            .parse()
            .unwrap();
        assert!(parse_chat_state(&plain).is_none());
    }
}
