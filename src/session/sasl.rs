//! SASL PLAIN payload construction (`sasl.c`'s `kfxmpp_sasl_plain`).

use base64::Engine;

/// Build the base64-encoded SASL PLAIN payload for `authcid`/`password`.
///
/// The wire payload is the raw concatenation `\0 authcid \0 password` (no
/// authzid, no length prefixes); RFC 4616 permits an empty authorization
/// identity, which is what the leading `\0` encodes.
pub fn encode_plain(authcid: &str, password: &str) -> String {
    let mut payload = Vec::with_capacity(authcid.len() + password.len() + 2);
    payload.push(0u8);
    payload.extend_from_slice(authcid.as_bytes());
    payload.push(0u8);
    payload.extend_from_slice(password.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(payload)
}
