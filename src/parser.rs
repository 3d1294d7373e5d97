//! Incremental XML stream parsing.
//!
//! This plays the role of `kfxmpp_stream_parser` (`streamparser.c`): it
//! wraps a non-blocking push parser (here, `rxml::Parser` — the same
//! tokenizer the teacher crate's `xmlstream` module builds on) and tracks
//! element depth relative to the stream root, so that:
//!
//! - the stream-open event (the root's attributes) fires exactly once, and
//! - each of the root's direct children is delivered as a whole stanza as
//!   soon as its closing tag arrives, without ever closing the root itself.

use rxml::error::EndOrError;
use rxml::{Event as RxEvent, Parse, Parser};

use crate::element::Element;
use crate::error::Error;

/// The root element's attributes, delivered once when the stream opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOpen {
    /// Integer part of the `version` attribute, or 0 when absent.
    pub version: u32,
    /// The `id` attribute, if present.
    pub id: Option<String>,
}

/// What a single [`StreamParser::feed`] call produced.
#[derive(Debug, Default)]
pub struct FeedOutcome {
    /// Set on the call during which the root element's start tag completes.
    pub stream_open: Option<StreamOpen>,
    /// Completed top-level stanzas, in document order.
    pub stanzas: Vec<Element>,
}

/// An incremental parser for one `<stream:stream>` document.
pub struct StreamParser {
    inner: Parser,
    // Element build stack. stack[0], once pushed, is the stream root and is
    // never popped by us; rxml itself never asks us to pop it either, since
    // spec requires the root to stay open for the session's lifetime.
    stack: Vec<Element>,
    stream_open_fired: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            inner: Parser::new(),
            stack: Vec::new(),
            stream_open_fired: false,
        }
    }

    /// Feed a chunk of bytes, of arbitrary size and alignment, into the
    /// parser. May be called any number of times with partial data; the
    /// underlying tokenizer buffers incomplete markup internally.
    pub fn feed(&mut self, data: &[u8]) -> Result<FeedOutcome, Error> {
        let mut outcome = FeedOutcome::default();
        let mut buf = data;
        loop {
            match self.inner.parse(&mut buf, false) {
                Ok(Some(RxEvent::XmlDeclaration(..))) => continue,
                Ok(Some(RxEvent::StartElement(_, (ns, local), attrs))) => {
                    let mut element = Element::new(local.as_str(), ns.as_str());
                    for ((_attr_ns, name), value) in attrs.iter() {
                        element.set_attr(name.as_str(), value.clone());
                    }
                    self.on_start(element, &mut outcome);
                }
                Ok(Some(RxEvent::EndElement(_))) => {
                    self.on_end(&mut outcome);
                }
                Ok(Some(RxEvent::Text(_, text))) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.append_text(text);
                    }
                }
                Ok(None) => {
                    if buf.is_empty() {
                        break;
                    }
                    continue;
                }
                Err(EndOrError::NeedMoreData) => break,
                Err(EndOrError::Error(e)) => return Err(Error::Parse(e.to_string())),
            }
        }
        Ok(outcome)
    }

    fn on_start(&mut self, element: Element, outcome: &mut FeedOutcome) {
        self.stack.push(element);
        if self.stack.len() == 1 && !self.stream_open_fired {
            self.stream_open_fired = true;
            let root = &self.stack[0];
            let version = root
                .attr("version")
                .and_then(|v| v.split('.').next())
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0);
            let id = root.attr("id").map(|s| s.to_string());
            outcome.stream_open = Some(StreamOpen { version, id });
        }
    }

    fn on_end(&mut self, outcome: &mut FeedOutcome) {
        // Depth is measured before the pop: 1 means the element about to
        // close is the root itself, 2 means it's one of the root's direct
        // children (a top-level stanza).
        let depth = self.stack.len();
        let Some(finished) = self.stack.pop() else {
            return;
        };
        match depth {
            // Popping the root itself (depth 1 -> 0) means the peer sent
            // </stream:stream>; per spec this produces no stanza and is not
            // our concern to report — the session learns of closure from
            // the transport, not from us.
            1 => {}
            // depth was 2 -> 1: `finished` is a direct child of the root
            // whose closing tag just arrived. Don't reattach it under the
            // root (that would grow unboundedly over a long-lived stream);
            // queue it for delivery instead.
            2 => outcome.stanzas.push(finished),
            _ => {
                if let Some(parent) = self.stack.last_mut() {
                    parent.append_child(finished);
                }
            }
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a single, already-complete, self-contained XML element (no
/// enclosing stream) in one shot. Used where the full document is already
/// in hand, e.g. round-tripping a serialized stanza in tests.
pub fn parse_one_shot(xml: &str) -> Option<Element> {
    let mut parser = Parser::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut result = None;
    let mut buf = xml.as_bytes();
    loop {
        match parser.parse(&mut buf, true) {
            Ok(Some(RxEvent::XmlDeclaration(..))) => continue,
            Ok(Some(RxEvent::StartElement(_, (ns, local), attrs))) => {
                let mut element = Element::new(local.as_str(), ns.as_str());
                for ((_attr_ns, name), value) in attrs.iter() {
                    element.set_attr(name.as_str(), value.clone());
                }
                stack.push(element);
            }
            Ok(Some(RxEvent::EndElement(_))) => {
                let finished = stack.pop()?;
                match stack.last_mut() {
                    Some(parent) => {
                        parent.append_child(finished);
                    }
                    None => {
                        result = Some(finished);
                    }
                }
            }
            Ok(Some(RxEvent::Text(_, text))) => {
                if let Some(top) = stack.last_mut() {
                    top.append_text(text);
                }
            }
            Ok(None) => {
                if buf.is_empty() {
                    break;
                }
                continue;
            }
            Err(_) => break,
        }
    }
    result
}
