//! A minimal DOM, built directly on `rxml`'s event stream.
//!
//! This plays the role `minidom::Element` plays in the teacher crate, but is
//! written by hand rather than taken from the `minidom` crate: `minidom`'s
//! public API is built around `std::io::Read`, while [`crate::parser`] needs
//! to build a tree incrementally from arbitrary, possibly-partial byte
//! chunks. It stays on the same underlying tokenizer (`rxml`) as the rest of
//! the stack.

use std::fmt::Write as _;

/// A child of an [`Element`]: either a nested element or a run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A nested element.
    Element(Element),
    /// A run of character data.
    Text(String),
}

/// A parsed or hand-built XML element.
///
/// Namespaces are tracked per-element as plain strings (the empty string
/// means "no namespace"), which is all XMPP stanza handling needs; this
/// mirrors the level of namespace support `minidom::Element` exposes to
/// callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    ns: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// Construct a bare element with no attributes or children.
    pub fn new(name: impl Into<String>, ns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns: ns.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style child appender.
    pub fn with_child(mut self, child: Element) -> Self {
        self.append_child(child);
        self
    }

    /// Builder-style text-content setter (replaces any prior text/children).
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.clear();
        self.children.push(Node::Text(text.into()));
        self
    }

    /// The local (unprefixed) name of the element, e.g. `"message"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace URI of the element, or `""` if unnamespaced.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self.attrs.iter_mut().find(|(k, _)| *k == name) {
            existing.1 = value.into();
        } else {
            self.attrs.push((name, value.into()));
        }
    }

    /// Get an attribute's value, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All attributes, in declaration/insertion order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Append a child element.
    pub fn append_child(&mut self, child: Element) -> &mut Element {
        self.children.push(Node::Element(child));
        match self.children.last_mut() {
            Some(Node::Element(e)) => e,
            _ => unreachable!(),
        }
    }

    /// Append a text child node.
    pub fn append_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    /// Iterate over child elements (skipping text nodes).
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Find the first direct child element with the given local name.
    pub fn get_child(&self, name: &str) -> Option<&Element> {
        self.children().find(|e| e.name() == name)
    }

    /// Concatenation of all direct text-node children (not recursive).
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let Node::Text(t) = node {
                out.push_str(t);
            }
        }
        out
    }

    /// Serialize this element (and its subtree) to UTF-8 XML text, with no
    /// indentation, matching `kfxmpp_stanza_to_string`'s use of
    /// `xmlNodeDump` at indent level zero.
    ///
    /// A child only carries an explicit `xmlns` when its namespace differs
    /// from the namespace already in scope from its parent, the same
    /// default-namespace elision `minidom` performs on serialization.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, "");
        out
    }

    fn write_xml(&self, out: &mut String, inherited_ns: &str) {
        write!(out, "<{}", self.name).ok();
        if self.ns != inherited_ns {
            write!(out, " xmlns='{}'", escape_attr(&self.ns)).ok();
        }
        for (k, v) in &self.attrs {
            write!(out, " {}='{}'", k, escape_attr(v)).ok();
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Element(e) => e.write_xml(out, &self.ns),
                Node::Text(t) => out.push_str(&escape_text(t)),
            }
        }
        write!(out, "</{}>", self.name).ok();
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('\'', "&apos;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
