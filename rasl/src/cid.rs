//! This module provides content identifier computation and validation.
//!
//! Identifiers are CIDv1 tokens over the raw codec: a sha2-256 multihash of the
//! whole payload, rendered as multibase base32-lower. The same computation runs
//! on both sides of the protocol and is the trust anchor for verification.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// CIDv1, raw codec, sha2-256 multihash of 32 bytes.
const CID_PREFIX: [u8; 4] = [0x01, 0x55, 0x12, 0x20];
/// Multibase marker for base32-lower.
const MULTIBASE_BASE32: char = 'b';
/// RFC 4648 base32 alphabet, lowercase, unpadded.
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// A content identifier in its canonical textual form.
///
/// Identical byte payloads always yield an identical token, which is used as
/// the sole cross-system key between locators, hint lookups and the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    /// Compute the identifier of a whole byte payload.
    ///
    /// Pure and total, the empty payload included.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(bytes.as_ref());

        let mut raw = Vec::with_capacity(CID_PREFIX.len() + digest.len());
        raw.extend_from_slice(&CID_PREFIX);
        raw.extend_from_slice(&digest);

        let mut token = String::with_capacity(1 + raw.len().div_ceil(5) * 8);
        token.push(MULTIBASE_BASE32);
        base32_lower(&raw, &mut token);

        Self(token)
    }

    /// Validate a wire token against the identifier grammar.
    pub fn parse(token: &str) -> Result<Self> {
        if Self::matches_grammar(token) {
            Ok(Self(token.to_owned()))
        } else {
            Err(Error::InvalidLocator(format!("invalid content identifier `{token}`")))
        }
    }

    /// Check the identifier grammar: the base32-lower multibase marker followed
    /// by at least one character of the restricted lowercase alphabet.
    pub fn matches_grammar(token: &str) -> bool {
        let mut chars = token.chars();

        chars.next() == Some(MULTIBASE_BASE32)
            && token.len() > 1
            && chars.all(|c| matches!(c, 'a'..='z' | '2'..='7' | '='))
    }

    /// The canonical textual form.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encode `input` as unpadded RFC 4648 base32, lowercase.
fn base32_lower(input: &[u8], out: &mut String) {
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for &byte in input {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;

        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[(buffer >> bits) as usize & 0x1f] as char);
        }
    }

    if bits > 0 {
        out.push(BASE32_ALPHABET[(buffer << (5 - bits)) as usize & 0x1f] as char);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base32_lower() {
        // RFC 4648 test vectors, lowercased and unpadded
        for (input, expected) in [
            (&b""[..], ""),
            (b"f", "my"),
            (b"fo", "mzxq"),
            (b"foo", "mzxw6"),
            (b"foob", "mzxw6yq"),
            (b"fooba", "mzxw6ytb"),
            (b"foobar", "mzxw6ytboi"),
        ] {
            let mut out = String::new();
            base32_lower(input, &mut out);
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(ContentId::from_bytes("ok"), ContentId::from_bytes(b"ok"));
        assert_ne!(ContentId::from_bytes("ok"), ContentId::from_bytes("rick"));
    }

    #[test]
    fn test_self_describing() {
        // version + codec + multihash header + digest, 5 bits per character
        let expected_len = 1 + (4usize + 32) * 8 / 5 + 1;

        for payload in [&b""[..], b"ok", &[0xff; 1024]] {
            let cid = ContentId::from_bytes(payload);

            assert_eq!(cid.as_str().len(), expected_len);
            assert!(ContentId::matches_grammar(cid.as_str()), "`{cid}` breaks its own grammar");
        }
    }

    #[test]
    fn test_grammar() {
        assert!(ContentId::matches_grammar("bafkreie2"));
        assert!(ContentId::matches_grammar("baaaa===="));

        assert!(!ContentId::matches_grammar(""));
        assert!(!ContentId::matches_grammar("b"));
        assert!(!ContentId::matches_grammar("Qmfoo"));
        assert!(!ContentId::matches_grammar("bAFKREIE"));
        assert!(!ContentId::matches_grammar("bafk reie"));
        assert!(!ContentId::matches_grammar("bafk/reie"));
        assert!(!ContentId::matches_grammar("bafk1eie"));
    }

    #[test]
    fn test_parse() {
        let cid = ContentId::from_bytes("ok");

        assert_eq!(ContentId::parse(cid.as_str()).unwrap(), cid);
        assert!(matches!(ContentId::parse("not-a-cid"), Err(Error::InvalidLocator(_))));
    }
}
