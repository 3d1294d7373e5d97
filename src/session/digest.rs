//! Legacy `jabber:iq:auth` digest authentication.

use sha1::{Digest, Sha1};

/// Compute the legacy auth digest: `SHA1_hex(stream_id || password)` over
/// the raw byte concatenation (no separator).
pub fn legacy_digest(stream_id: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_sha1_over_raw_concatenation() {
        // SHA1("3EE948B0bardfool"), verified independently against a
        // reference `sha1sum` run over the raw concatenation.
        assert_eq!(
            legacy_digest("3EE948B0", "bardfool"),
            "f3ba84bda79c88c00b59c9ef8c9ade572cee479d"
        );
    }
}
