//! Error types surfaced by this crate.
//!
//! Following the teacher's `tokio-xmpp::error` module, these are plain enums
//! with a hand-written [`std::fmt::Display`] and [`std::error::Error`] impl
//! rather than a derive-macro-generated one.

use std::fmt;

/// The stable, ordinal-compatible connect-phase error kinds.
///
/// These are the only values ever delivered to a connect callback or to
/// [`crate::session::Session::disconnect`]'s status; they deliberately do not
/// carry payloads so that callers can match on them exhaustively and log the
/// richer context (which arrives separately, via `log`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectError {
    /// No error; used as the "success" sentinel passed to a connect callback.
    None,
    /// An error occurred that doesn't fit any other kind.
    Unknown,
    /// The connect attempt was cancelled by the caller.
    Cancelled,
    /// DNS resolution of the target host failed.
    AddressLookupFailed,
    /// The TCP connect attempt itself failed.
    ConnectFailed,
    /// TLS was required by policy but the peer did not advertise it.
    TlsNotAvailable,
    /// The STARTTLS handshake failed.
    TlsHandshakeFailed,
    /// SASL or legacy authentication failed.
    AuthFailed,
    /// `connect` was called while a session was already open.
    SessionAlreadyOpen,
    /// An operation required an open session but none was open.
    SessionNotOpen,
    /// The connect timeout elapsed before the connection completed.
    Timeout,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectError::None => "no error",
            ConnectError::Unknown => "unknown error",
            ConnectError::Cancelled => "connect cancelled",
            ConnectError::AddressLookupFailed => "address lookup failed",
            ConnectError::ConnectFailed => "connect failed",
            ConnectError::TlsNotAvailable => "tls not available",
            ConnectError::TlsHandshakeFailed => "tls handshake failed",
            ConnectError::AuthFailed => "authentication failed",
            ConnectError::SessionAlreadyOpen => "session already open",
            ConnectError::SessionNotOpen => "session not open",
            ConnectError::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ConnectError {}

/// Why the disconnect callback fired, distinct from [`ConnectError`]: these
/// only ever describe a post-open transport loss, not a connect-phase
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The caller explicitly called `disconnect()`.
    User,
    /// The peer closed the connection or the transport errored.
    RemoteHost,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::User => f.write_str("disconnected by caller"),
            DisconnectReason::RemoteHost => f.write_str("remote host closed the connection"),
        }
    }
}

/// The ambient error type for operations that aren't part of the connect
/// callback surface: direct I/O, TLS setup, and ordinary state-precondition
/// violations returned synchronously from handle methods.
#[derive(Debug)]
pub enum Error {
    /// A state-precondition was violated (e.g. connecting while already open).
    State(ConnectError),
    /// The underlying transport failed.
    Io(std::io::Error),
    /// TLS setup or handshake failed.
    #[cfg(feature = "tls-native")]
    Tls(native_tls::Error),
    /// The XML stream was malformed. Per spec, parser faults are treated as
    /// transport failures, not surfaced through a distinct error kind.
    Parse(String),
    /// The run loop was gone when a handle call tried to reach it.
    Disconnected,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::State(e) => write!(f, "{}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            #[cfg(feature = "tls-native")]
            Error::Tls(e) => write!(f, "tls error: {}", e),
            Error::Parse(msg) => write!(f, "xml stream error: {}", msg),
            Error::Disconnected => write!(f, "session is disconnected"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::State(e) => Some(e),
            Error::Io(e) => Some(e),
            #[cfg(feature = "tls-native")]
            Error::Tls(e) => Some(e),
            Error::Parse(_) => None,
            Error::Disconnected => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(feature = "tls-native")]
impl From<native_tls::Error> for Error {
    fn from(e: native_tls::Error) -> Self {
        Error::Tls(e)
    }
}
