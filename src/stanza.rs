//! Typed wrapper over a top-level XMPP stanza element.

use crate::element::Element;

/// The three stanza kinds XMPP defines, plus a sentinel for anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Message,
    Presence,
    Iq,
    Unknown,
}

impl Kind {
    fn element_name(self) -> &'static str {
        match self {
            Kind::Message => "message",
            Kind::Presence => "presence",
            Kind::Iq => "iq",
            Kind::Unknown => "unknown",
        }
    }

    fn from_element_name(name: &str) -> Kind {
        match name {
            "message" => Kind::Message,
            "presence" => Kind::Presence,
            "iq" => Kind::Iq,
            _ => Kind::Unknown,
        }
    }
}

/// A `message`, `presence`, or `iq` stanza: a [`Kind`] plus the underlying
/// element tree.
#[derive(Debug, Clone)]
pub struct Stanza {
    kind: Kind,
    element: Element,
}

pub const JABBER_CLIENT_NS: &str = "jabber:client";

impl Stanza {
    /// Construct a bare stanza of `kind`, optionally addressed `to` a JID.
    pub fn new(kind: Kind, to: Option<&str>) -> Self {
        let mut element = Element::new(kind.element_name(), JABBER_CLIENT_NS);
        if let Some(to) = to {
            element.set_attr("to", to);
        }
        Self { kind, element }
    }

    /// Wrap a parsed element as a stanza, deriving its kind from the element
    /// name. Unrecognized names become `Kind::Unknown` and are logged.
    pub fn from_xml(element: Element) -> Self {
        let kind = Kind::from_element_name(element.name());
        if kind == Kind::Unknown {
            log::debug!("stanza with unrecognized top-level name: {}", element.name());
        }
        Self { kind, element }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn element_mut(&mut self) -> &mut Element {
        &mut self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.element.attr(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.element.set_attr(name, value);
    }

    /// Serialize to UTF-8 XML text with no extra indentation.
    #[allow(clippy::inherent_to_string)]
    pub fn to_string(&self) -> String {
        self.element.to_xml_string()
    }
}
