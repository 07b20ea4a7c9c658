//! Cache fingerprints: 16-hex-char SHA-256 prefixes.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 16;

/// Fingerprint of a canonical normalized text.
///
/// This is the L1 key and the cross-layer identity of a cached query schema.
pub fn fingerprint(normalized_text: &str) -> String {
    let digest = Sha256::digest(normalized_text.as_bytes());
    hex::encode(digest)[..FINGERPRINT_LEN].to_string()
}

/// Key derivation for callers that only have raw query text (no parsed
/// intent): lowercase, trim, collapse whitespace runs, then hash.
///
/// The resolve pipeline always keys by intent fingerprint; this variant
/// exists for pre-parse lookups only.
pub fn query_text_key(query: &str) -> String {
    let collapsed = query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    fingerprint(&collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_16_lowercase_hex_chars() {
        let fp = fingerprint("entity:users|operation:list");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("entity:users|operation:list");
        let b = fingerprint("entity:users|operation:list");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_texts_produce_different_fingerprints() {
        assert_ne!(
            fingerprint("entity:users|operation:list"),
            fingerprint("entity:users|operation:count")
        );
    }

    #[test]
    fn test_query_text_key_collapses_case_and_whitespace() {
        assert_eq!(
            query_text_key("  Get   ALL active\nusers "),
            query_text_key("get all active users")
        );
    }
}
