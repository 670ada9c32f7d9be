//! Key material and fingerprints
//!
//! Public keys are immutable byte blobs shared by reference count, so a
//! verified key can alias the public or gossip key without copying. Parsing
//! the OpenPGP packets inside is not this crate's business; the fingerprint
//! is a deterministic digest over the raw key bytes.

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Result, SecureJoinError};

/// Length of a normalized fingerprint in hex characters
pub const FINGERPRINT_HEX_LEN: usize = 40;

// ----------------------------------------------------------------------------
// Fingerprint
// ----------------------------------------------------------------------------

/// Uppercase hex fingerprint of a public key
///
/// An empty fingerprint is a valid value: it marks a key whose fingerprint
/// could not be computed. Such a fingerprint never matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Normalize a human-formatted fingerprint, dropping everything that is
    /// not a hex digit (spaces, colons, dashes) and uppercasing the rest
    pub fn normalize(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| c.is_ascii_hexdigit())
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        )
    }

    /// Get the fingerprint as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Case-insensitive comparison; empty fingerprints never match
    pub fn matches(&self, other: &str) -> bool {
        !self.0.is_empty() && !other.is_empty() && self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = SecureJoinError;

    fn from_str(s: &str) -> Result<Self> {
        let fingerprint = Self::normalize(s);
        if fingerprint.len() != FINGERPRINT_HEX_LEN {
            return Err(SecureJoinError::invalid_key(format!(
                "fingerprint must have {} hex digits, got {}",
                FINGERPRINT_HEX_LEN,
                fingerprint.len()
            )));
        }
        Ok(fingerprint)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Public Key
// ----------------------------------------------------------------------------

/// A peer's public key as raw bytes
#[derive(Clone, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: Arc<[u8]>,
}

impl PublicKey {
    /// Create a key from its raw bytes
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
        }
    }

    /// Create a key with no bytes
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// A key without bytes is never usable, whatever fingerprint is cached
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether two handles share the same allocation
    pub fn ptr_eq(&self, other: &PublicKey) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Derive the fingerprint: the first 20 bytes of the SHA-256 digest as
    /// uppercase hex, or an empty fingerprint for an empty key
    pub fn fingerprint(&self) -> Fingerprint {
        if self.bytes.is_empty() {
            return Fingerprint::default();
        }
        let digest = Sha256::digest(&self.bytes[..]);
        Fingerprint(hex::encode_upper(&digest[..FINGERPRINT_HEX_LEN / 2]))
    }

    /// Encode the key for the `keydata` attribute
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD.encode(&self.bytes[..])
    }

    /// Decode `keydata`, ignoring the whitespace header folding leaves behind
    pub fn from_base64(encoded: &str) -> Result<Self> {
        use base64::{engine::general_purpose, Engine as _};
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| SecureJoinError::invalid_key(format!("invalid base64: {}", e)))?;
        Ok(Self::from_bytes(bytes))
    }
}

impl Default for PublicKey {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..] == other.bytes[..]
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint().as_str())
            .finish()
    }
}

impl From<Vec<u8>> for PublicKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fingerprint() {
        let fpr = Fingerprint::normalize("1234 5678 90ab cdef:1234-5678");
        assert_eq!(fpr.as_str(), "1234567890ABCDEF12345678");

        let fpr: Fingerprint = "aaaa bbbb cccc dddd eeee ffff aaaa bbbb cccc dddd"
            .parse()
            .unwrap();
        assert_eq!(fpr.len(), FINGERPRINT_HEX_LEN);

        assert!("ABCD".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_fingerprint_matches_case_insensitively() {
        let fpr = Fingerprint::normalize("ABCDEF");
        assert!(fpr.matches("abcdef"));
        assert!(!fpr.matches("abcde0"));
        assert!(!fpr.matches(""));
        assert!(!Fingerprint::default().matches(""));
    }

    #[test]
    fn test_key_fingerprint_is_deterministic() {
        let a = PublicKey::from_bytes(vec![1, 2, 3]);
        let b = PublicKey::from_bytes(vec![1, 2, 3]);
        let c = PublicKey::from_bytes(vec![3, 2, 1]);

        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), FINGERPRINT_HEX_LEN);
        assert!(PublicKey::empty().fingerprint().is_empty());
    }

    #[test]
    fn test_base64_keydata() {
        let key = PublicKey::from_bytes(b"some key bytes".to_vec());
        let encoded = key.to_base64();
        let folded = format!("{}\r\n {}", &encoded[..4], &encoded[4..]);
        assert_eq!(PublicKey::from_base64(&folded).unwrap(), key);
        assert!(PublicKey::from_base64("!!!").is_err());
    }
}
