//! Autocrypt header values
//!
//! The structured form of an `Autocrypt:` or `Autocrypt-Gossip:` header as
//! consumed by [`PeerState`](crate::PeerState). Locating the header inside a
//! message is done by the MIME layer; this module only handles the attribute
//! list `addr=...; prefer-encrypt=...; keydata=...`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::key::PublicKey;
use crate::util::normalize_addr;
use crate::{Result, SecureJoinError};

// ----------------------------------------------------------------------------
// Encryption Preference
// ----------------------------------------------------------------------------

/// Encryption preference announced by a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreferEncrypt {
    /// No explicit preference
    #[default]
    NoPreference = 0,
    /// Both sides want encryption by default
    Mutual = 1,
    /// Peer stopped sending Autocrypt headers; preference unknown again
    Reset = 20,
}

impl PreferEncrypt {
    /// Attribute value used in rendered headers, if any
    pub fn attribute_value(&self) -> Option<&'static str> {
        match self {
            PreferEncrypt::Mutual => Some("mutual"),
            PreferEncrypt::NoPreference | PreferEncrypt::Reset => None,
        }
    }
}

impl fmt::Display for PreferEncrypt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferEncrypt::NoPreference => write!(f, "nopreference"),
            PreferEncrypt::Mutual => write!(f, "mutual"),
            PreferEncrypt::Reset => write!(f, "reset"),
        }
    }
}

// ----------------------------------------------------------------------------
// Autocrypt Header
// ----------------------------------------------------------------------------

/// A parsed Autocrypt header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutocryptHeader {
    /// Address the key belongs to
    pub addr: String,
    /// Key carried in `keydata`
    pub public_key: PublicKey,
    /// Announced encryption preference
    pub prefer_encrypt: PreferEncrypt,
}

impl AutocryptHeader {
    pub fn new<A: Into<String>>(
        addr: A,
        public_key: PublicKey,
        prefer_encrypt: PreferEncrypt,
    ) -> Self {
        Self {
            addr: addr.into(),
            public_key,
            prefer_encrypt,
        }
    }

    /// Render the header value (without the `Autocrypt:` field name)
    ///
    /// Returns `None` when there is no address or no key to announce.
    pub fn render(&self) -> Option<String> {
        if self.addr.is_empty() || self.public_key.is_empty() {
            return None;
        }

        let mut rendered = format!("addr={}; ", self.addr);
        if let Some(value) = self.prefer_encrypt.attribute_value() {
            rendered.push_str(&format!("prefer-encrypt={}; ", value));
        }
        rendered.push_str("keydata=");
        rendered.push_str(&self.public_key.to_base64());
        Some(rendered)
    }
}

impl FromStr for AutocryptHeader {
    type Err = SecureJoinError;

    fn from_str(value: &str) -> Result<Self> {
        let mut addr = None;
        let mut public_key = None;
        let mut prefer_encrypt = PreferEncrypt::NoPreference;

        for attribute in value.split(';') {
            let attribute = attribute.trim();
            if attribute.is_empty() {
                continue;
            }

            let (name, attr_value) = attribute.split_once('=').ok_or_else(|| {
                SecureJoinError::invalid_header(format!("attribute without value: {}", attribute))
            })?;
            let name = name.trim().to_ascii_lowercase();
            let attr_value = attr_value.trim();

            match name.as_str() {
                "addr" => addr = Some(normalize_addr(attr_value)),
                "prefer-encrypt" => {
                    if attr_value.eq_ignore_ascii_case("mutual") {
                        prefer_encrypt = PreferEncrypt::Mutual;
                    }
                }
                "keydata" => public_key = Some(PublicKey::from_base64(attr_value)?),
                // non-critical attributes may be ignored
                other if other.starts_with('_') => {}
                other => {
                    return Err(SecureJoinError::invalid_header(format!(
                        "unknown critical attribute: {}",
                        other
                    )))
                }
            }
        }

        let addr = addr
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SecureJoinError::invalid_header("missing addr"))?;
        let public_key = public_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SecureJoinError::invalid_header("missing keydata"))?;

        Ok(Self {
            addr,
            public_key,
            prefer_encrypt,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
