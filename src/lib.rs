//! Client-side XMPP 1.0 / legacy Jabber session library.
//!
//! Establishes a long-lived, asynchronous TCP connection, negotiates the
//! XML stream, optionally upgrades to TLS via STARTTLS, authenticates
//! (SASL PLAIN or legacy `jabber:iq:auth`), binds a resource, and exchanges
//! `<message/>`, `<presence/>`, and `<iq/>` stanzas with the peer.
//!
//! See [`session::Session`] for the connection entry point.

pub mod element;
pub mod error;
pub mod event;
pub mod message;
pub mod parser;
pub mod session;
pub mod stanza;

pub use element::Element;
pub use error::{ConnectError, DisconnectReason, Error};
pub use event::{Event, Handler, Priority};
pub use message::{Message, MessageType};
pub use parser::StreamParser;
pub use session::{Protocol, Session, SessionConfig, TlsPolicy};
pub use stanza::{Kind, Stanza};
