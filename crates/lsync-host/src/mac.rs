//! Webhook content authentication.
//!
//! Notifications carry `hmac-sha256=<hex>` computed over the exact raw request
//! body with a per-collection shared secret.

use std::fmt;

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SyncError;

type HmacSha256 = Hmac<Sha256>;

pub const MAC_PREFIX: &str = "hmac-sha256=";

/// Header carrying the content MAC.
pub const MAC_HEADER: &str = "x-content-mac";
/// Header name used by older notifiers; accepted as an alias.
pub const LEGACY_MAC_HEADER: &str = "x-airtable-content-mac";

/// Decoded shared secret. Debug output never shows the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct MacSecret(Vec<u8>);

impl MacSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, SyncError> {
        BASE64_STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|e| SyncError::config(format!("malformed base64 MAC secret: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MacSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacSecret(<{} bytes>)", self.0.len())
    }
}

fn digest(body: &[u8], secret: &MacSecret) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Compute the tag a notifier would send for `body`.
pub fn sign(body: &[u8], secret: &MacSecret) -> String {
    format!("{MAC_PREFIX}{}", hex::encode(digest(body, secret)))
}

/// Check `received_tag` against the MAC of `body`.
///
/// The whole tag is compared byte-for-byte in constant time, so the prefix and
/// lowercase hex encoding must match exactly.
pub fn verify(body: &[u8], received_tag: &str, secret: &MacSecret) -> bool {
    let expected = sign(body, secret);
    bool::from(expected.as_bytes().ct_eq(received_tag.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> MacSecret {
        MacSecret::new(b"s".to_vec())
    }

    #[test]
    fn sign_produces_prefixed_hex() {
        let tag = sign(b"{}", &secret());
        assert!(tag.starts_with(MAC_PREFIX));
        let hex_part = &tag[MAC_PREFIX.len()..];
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn known_vector_matches() {
        // RFC 4231 test case 2.
        let secret = MacSecret::new(b"Jefe".to_vec());
        let tag = sign(b"what do ya want for nothing?", &secret);
        assert_eq!(
            tag,
            "hmac-sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_exact_tag() {
        let tag = sign(b"{}", &secret());
        assert!(verify(b"{}", &tag, &secret()));
    }

    #[test]
    fn any_single_byte_mutation_is_rejected() {
        let tag = sign(b"{}", &secret());
        for i in 0..tag.len() {
            let mut bytes = tag.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(bytes).unwrap();
            if mutated == tag {
                continue;
            }
            assert!(!verify(b"{}", &mutated, &secret()), "mutation at {i} accepted");
        }

        assert!(!verify(b"{ }", &tag, &secret()));
        assert!(!verify(b"[]", &tag, &secret()));
    }

    #[test]
    fn wrong_secret_or_missing_prefix_is_rejected() {
        let tag = sign(b"{}", &secret());
        assert!(!verify(b"{}", &tag, &MacSecret::new(b"t".to_vec())));
        assert!(!verify(b"{}", &tag[MAC_PREFIX.len()..], &secret()));
        assert!(!verify(b"{}", "hmac-sha256=zz", &secret()));
        assert!(!verify(b"{}", "", &secret()));
        assert!(!verify(b"{}", &tag.to_uppercase(), &secret()));
    }

    #[test]
    fn malformed_secret_encoding_fails() {
        assert!(MacSecret::from_base64("not base64!").is_err());
        let secret = MacSecret::from_base64("c2VjcmV0").unwrap();
        assert_eq!(secret.as_bytes(), b"secret");
        assert_eq!(format!("{secret:?}"), "MacSecret(<6 bytes>)");
    }
}
