//! Session lifecycle: token codec, persistent session store, and the manager
//! tying them together.
//!
//! A login produces an access token (1 hour) and a refresh token (7 days)
//! sharing one session id. Both are only honoured while the session row
//! backing them is active and unexpired, so revoking the row revokes every
//! token minted for it. Access tokens additionally carry a fingerprint of the
//! client's ip and user-agent; presenting one from a different client is
//! treated as a possible hijack.

pub mod manager;
pub mod store;
pub mod token;

pub use manager::{SESSION_TTL, SessionManager};
pub use store::{MemorySessionStore, SessionStore};
pub use token::{
    ACCESS_TOKEN_TTL, AccessClaims, REFRESH_TOKEN_TTL, RefreshClaims, TokenCodec, TokenError,
    TokenType,
};

use sha2::{Digest, Sha256};

/// Length of the hex fingerprint embedded in access tokens
pub const FINGERPRINT_LEN: usize = 16;

/// Digest of `ip:user_agent`, truncated to [`FINGERPRINT_LEN`] hex chars.
pub fn fingerprint(ip_address: &str, user_agent: &str) -> String {
    let digest = Sha256::digest(format!("{ip_address}:{user_agent}").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint("127.0.0.1", "curl/8.0");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_depends_on_both_inputs() {
        let base = fingerprint("127.0.0.1", "curl/8.0");
        assert_eq!(base, fingerprint("127.0.0.1", "curl/8.0"));
        assert_ne!(base, fingerprint("127.0.0.2", "curl/8.0"));
        assert_ne!(base, fingerprint("127.0.0.1", "curl/8.1"));
    }

    #[test]
    fn test_fingerprint_matches_sha256_prefix() {
        // sha256("1.2.3.4:ua")
        let expected = hex::encode(Sha256::digest(b"1.2.3.4:ua"));
        assert_eq!(fingerprint("1.2.3.4", "ua"), expected[..16]);
    }
}
