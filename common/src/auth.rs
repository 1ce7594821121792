//! Bearer-token hashing and constant-time comparison.
//!
//! The server never stores plaintext API keys — config carries
//! `sha256:<hex>` and incoming bearer tokens are hashed the same way before
//! lookup (spec §4.6 "Authentication").

use sha2::{Digest, Sha256};

/// Hash a raw API key into the `sha256:<hex>` form stored in caller config.
#[must_use]
pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Constant-time byte comparison, reused verbatim from the pattern the
/// teacher uses for its own bearer-token check — always iterates the full
/// expected length so an attacker can't infer key length from timing.
#[must_use]
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, &e) in expected.iter().enumerate() {
        let p = if i < provided.len() { provided[i] } else { 0xff };
        diff |= e ^ p;
    }
    diff == 0
}

/// Hash a raw bearer token and compare (constant-time) against a stored
/// `sha256:<hex>` digest.
#[must_use]
pub fn verify_api_key(raw_token: &str, stored_hash: &str) -> bool {
    let computed = hash_api_key(raw_token);
    constant_time_eq(stored_hash.as_bytes(), computed.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_has_expected_prefix_and_length() {
        let h = hash_api_key("secret");
        assert!(h.starts_with("sha256:"));
        assert_eq!(h.len(), "sha256:".len() + 64);
    }

    #[test]
    fn verify_roundtrip() {
        let hash = hash_api_key("correct-horse-battery-staple");
        assert!(verify_api_key("correct-horse-battery-staple", &hash));
        assert!(!verify_api_key("wrong", &hash));
    }

    #[test]
    fn constant_time_eq_handles_different_lengths() {
        assert!(!constant_time_eq(b"abcdef", b"abc"));
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
    }
}
