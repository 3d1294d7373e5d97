//! High-level convenience over `<message/>` stanza construction and parsing.

use crate::element::Element;
use crate::error::Error;
use crate::session::Session;
use crate::stanza::{Kind, Stanza, JABBER_CLIENT_NS};

/// The `type` attribute of a `<message/>` stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Normal,
    Chat,
    Headline,
}

impl MessageType {
    fn as_str(self) -> Option<&'static str> {
        match self {
            MessageType::Normal => None,
            MessageType::Chat => Some("chat"),
            MessageType::Headline => Some("headline"),
        }
    }

    fn from_str(s: &str) -> MessageType {
        match s {
            "chat" => MessageType::Chat,
            "headline" => MessageType::Headline,
            _ => MessageType::Normal,
        }
    }
}

/// A chat message: a simpler, field-based view over a `<message/>` stanza.
///
/// Unlike the original `KfxmppMessage`, which was reference-counted so it
/// could be shared between the event that delivered it and any code holding
/// onto it afterwards, this is a plain owned, `Clone`-able value — Rust's
/// ordinary ownership already gives every holder an independent, valid copy
/// without needing manual refcounting (see the design note on replacing
/// refcounting with ownership).
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub kind: Option<MessageType>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the `<message/>` stanza and transmit it through `session`.
    /// Sets `type="chat"` when `self.kind` requests it, adds `<subject/>`
    /// only if non-empty, and always adds `<body/>`.
    pub async fn send(&self, session: &Session) -> Result<i64, Error> {
        let mut stanza = Stanza::new(Kind::Message, self.to.as_deref());
        if let Some(from) = &self.from {
            stanza.set_attr("from", from.clone());
        }
        if let Some(kind) = self.kind {
            if let Some(type_str) = kind.as_str() {
                stanza.set_attr("type", type_str);
            }
        }
        if let Some(subject) = &self.subject {
            if !subject.is_empty() {
                stanza
                    .element_mut()
                    .append_child(Element::new("subject", JABBER_CLIENT_NS).with_text(subject.clone()));
            }
        }
        stanza.element_mut().append_child(
            Element::new("body", JABBER_CLIENT_NS).with_text(self.body.clone().unwrap_or_default()),
        );
        session.send(stanza).await
    }

    /// Parse `from`, `to`, `type` attributes and `subject`/`body` child text
    /// out of a stanza.
    pub fn parse_stanza(stanza: &Stanza) -> Self {
        let element = stanza.element();
        Self {
            from: element.attr("from").map(str::to_string),
            to: element.attr("to").map(str::to_string),
            subject: element.get_child("subject").map(|e| e.text()),
            body: element.get_child("body").map(|e| e.text()),
            kind: element.attr("type").map(MessageType::from_str),
        }
    }

    /// Convenience for `kfxmpp_message_send_simple`: build and send a plain
    /// chat message in one call.
    pub async fn send_simple(session: &Session, to: impl Into<String>, body: impl Into<String>) -> Result<i64, Error> {
        let msg = Message {
            to: Some(to.into()),
            body: Some(body.into()),
            kind: Some(MessageType::Chat),
            ..Default::default()
        };
        msg.send(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one_shot;

    #[test]
    fn parse_stanza_reads_fields() {
        let xml = "<message to='a@b' from='c@d' type='chat'><subject>hey</subject><body>hi</body></message>";
        let element = parse_one_shot(xml).unwrap();
        let stanza = Stanza::from_xml(element);
        let msg = Message::parse_stanza(&stanza);
        assert_eq!(msg.to.as_deref(), Some("a@b"));
        assert_eq!(msg.from.as_deref(), Some("c@d"));
        assert_eq!(msg.subject.as_deref(), Some("hey"));
        assert_eq!(msg.body.as_deref(), Some("hi"));
        assert_eq!(msg.kind, Some(MessageType::Chat));
    }
}
