//! Session identity and runtime configuration.

/// Which dialect of the protocol to speak.
///
/// `Auto` inspects the stream-open `version` attribute to decide between
/// XMPP 1.0 feature negotiation and legacy `jabber:iq:auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Auto,
    Xmpp,
    Jabber,
}

/// When to attempt the in-band TLS upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    Always,
    IfAvailable,
    Never,
}

pub const DEFAULT_PORT: u16 = 5222;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Identity and runtime fields a [`crate::session::Session`] is configured
/// with before connecting. Per spec these are only meaningful to mutate
/// while the session is closed; this crate enforces that by consuming a
/// `SessionConfig` once, at `Session::new`, rather than exposing setters on
/// a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub username: String,
    pub server: String,
    pub password: String,
    pub resource: String,
    pub host_address: Option<String>,
    pub port: u16,
    pub priority: i8,
    pub protocol: Protocol,
    pub tls_policy: TlsPolicy,
    pub timeout_secs: u64,
}

impl SessionConfig {
    /// A config with the same defaults `kfxmpp_session_new` establishes:
    /// port 5222, protocol auto, TLS if-available, 60s connect timeout.
    pub fn new(username: impl Into<String>, server: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            server: server.into(),
            password: password.into(),
            resource: String::new(),
            host_address: None,
            port: DEFAULT_PORT,
            priority: 0,
            protocol: Protocol::Auto,
            tls_policy: TlsPolicy::IfAvailable,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls_policy = policy;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_host_address(mut self, host: impl Into<String>) -> Self {
        self.host_address = Some(host.into());
        self
    }

    pub(crate) fn connect_target(&self) -> (&str, u16) {
        (self.host_address.as_deref().unwrap_or(&self.server), self.port)
    }
}
