// Message stanzas: `{ type: chat|groupchat, from, to, id, body }`.
// The client-assigned id also travels as an XEP-0359 origin-id, which rooms
// keep even when they rewrite the stanza id.

use chrono::{DateTime, Utc};
use xmpp_parsers::Element;

use super::{custom_ns, NS_JABBER_CLIENT};
use crate::models::{LiveMessage, MessageKind, OutgoingMessage};

pub fn build_message(outgoing: &OutgoingMessage) -> Element {
    let mut body = Element::builder("body", NS_JABBER_CLIENT).build();
    body.append_text_node(outgoing.body.as_str());

    let origin_id = Element::builder("origin-id", custom_ns::SID)
        .attr("id", &outgoing.id)
        .build();
    let active = Element::builder("active", custom_ns::CHATSTATES).build();

    Element::builder("message", NS_JABBER_CLIENT)
        .attr("type", outgoing.kind.stanza_type())
        .attr("to", &outgoing.to)
        .attr("id", &outgoing.id)
        .append(body)
        .append(origin_id)
        .append(active)
        .build()
}

/// Returns None for stanzas without a usable body or of an unsupported type.
pub fn parse_message(stanza: &Element) -> Option<LiveMessage> {
    if stanza.name() != "message" {
        return None;
    }
    let kind = MessageKind::from_stanza_type(stanza.attr("type").unwrap_or("normal"))?;
    let from = stanza.attr("from")?.to_string();
    let body = stanza.get_child("body", NS_JABBER_CLIENT)?.text();
    if body.is_empty() {
        return None;
    }

    let id = stanza
        .get_child("origin-id", custom_ns::SID)
        .and_then(|origin| origin.attr("id"))
        .or_else(|| stanza.attr("id"))
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Some(LiveMessage {
        id,
        from,
        to: stanza.attr("to").map(|s| s.to_string()),
        kind,
        body,
        delay: parse_delay(stanza),
    })
}

/// XEP-0203 delay stamp, if present and well-formed.
pub fn parse_delay(stanza: &Element) -> Option<DateTime<Utc>> {
    let stamp = stanza.get_child("delay", custom_ns::DELAY)?.attr("stamp")?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_groupchat_with_origin_id() {
        let stanza = build_message(&OutgoingMessage {
            id: "abc-1".into(),
            to: "r123@conference.example.org".into(),
            body: "hello".into(),
            kind: MessageKind::Room,
        });
        assert_eq!(stanza.attr("type"), Some("groupchat"));
        assert_eq!(stanza.attr("to"), Some("r123@conference.example.org"));
        assert_eq!(stanza.get_child("body", NS_JABBER_CLIENT).unwrap().text(), "hello");
        assert_eq!(
            stanza.get_child("origin-id", custom_ns::SID).and_then(|e| e.attr("id")),
            Some("abc-1")
        );
    }

    #[test]
    fn parse_prefers_origin_id_over_rewritten_id() {
        let stanza: Element = r#"<message xmlns="jabber:client" type="groupchat" id="server-rewritten" from="r123@conference.example.org/bob" to="alice@example.org/x">
                <body>hi all</body>
                <origin-id xmlns="urn:xmpp:sid:0" id="client-id"/>
            </message>"#
            .parse()
            .unwrap();
        let live = parse_message(&stanza).unwrap();
        assert_eq!(live.id, "client-id");
        assert_eq!(live.kind, MessageKind::Room);
        assert_eq!(live.body, "hi all");
        assert_eq!(live.from, "r123@conference.example.org/bob");
        assert!(live.delay.is_none());
    }

    #[test]
    fn parse_reads_delay_stamp() {
        let stanza: Element = r#"<message xmlns="jabber:client" type="chat" id="m1" from="bob@example.org/pc">
                <body>offline note</body>
                <delay xmlns="urn:xmpp:delay" stamp="2024-03-01T10:00:00.250Z"/>
            </message>"#
            .parse()
            .unwrap();
        let live = parse_message(&stanza).unwrap();
        assert_eq!(live.id, "m1");
        assert_eq!(live.kind, MessageKind::Direct);
        assert_eq!(
            live.delay.unwrap(),
            "2024-03-01T10:00:00.250Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn bodiless_and_error_messages_are_skipped() {
        let typing: Element = r#"<message xmlns="jabber:client" type="chat" from="bob@example.org/pc"><composing xmlns="http://jabber.org/protocol/chatstates"/></message>"#
            .parse()
            .unwrap();
        assert!(parse_message(&typing).is_none());

        let error: Element = r#"<message xmlns="jabber:client" type="error" from="bob@example.org"><body>x</body></message>"#
            .parse()
            .unwrap();
        assert!(parse_message(&error).is_none());
    }
}
