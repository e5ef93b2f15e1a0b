//! Security primitives shared by the auth flows.
//!
//! - [`random_token`]: URL-safe random identifiers (session ids, CSRF values)
//! - [`constant_time_eq`]: timing-safe string comparison
//! - [`csrf`]: per-client CSRF tokens with a fixed lifetime

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use subtle::ConstantTimeEq;

pub mod csrf;

pub use csrf::{CSRF_TTL, CsrfProtection, CsrfStore, CsrfToken, MemoryCsrfStore};

/// Generate `bytes` random bytes from the thread-local CSPRNG, encoded as
/// unpadded URL-safe base64.
///
/// 32 bytes yields a 43 character token.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Compare two strings without short-circuiting on the first differing byte.
///
/// Length differences still return early; lengths are not secret here.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_shape() {
        let token = random_token(32);
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_random_tokens_differ() {
        assert_ne!(random_token(32), random_token(32));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("", ""));
    }
}
