//! Autocrypt peer state
//!
//! One [`PeerState`] exists per correspondent address. It records the key the
//! peer announced directly, the key learned about it through gossip, the key
//! confirmed out-of-band, the announced encryption preference and the degrade
//! events raised since the owner last acknowledged them.
//!
//! All transitions are driven by observed headers and their message times.
//! The direct and gossip channels keep independent timestamps and only
//! strictly newer observations are applied.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::aheader::{AutocryptHeader, PreferEncrypt};
use crate::key::{Fingerprint, PublicKey};
use crate::types::Timestamp;
use crate::util::addr_cmp;

// ----------------------------------------------------------------------------
// Degrade Events
// ----------------------------------------------------------------------------

/// Bitmask of trust-decreasing transitions since the last acknowledgement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DegradeEvent(u8);

impl DegradeEvent {
    pub const NONE: Self = Self(0);
    /// Peer switched away from `prefer-encrypt=mutual`
    pub const ENCRYPTION_PAUSED: Self = Self(0x01);
    /// A known key was replaced by one with a different fingerprint
    pub const FINGERPRINT_CHANGED: Self = Self(0x02);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: DegradeEvent) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: DegradeEvent) {
        self.0 |= other.0;
    }
}

// ----------------------------------------------------------------------------
// Save Scope
// ----------------------------------------------------------------------------

/// How much of a record has to be written back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SaveScope {
    /// Nothing changed since load or last save
    #[default]
    Nothing,
    /// Only the last-seen timestamps moved
    Timestamps,
    /// Key, fingerprint, preference or verification changed
    All,
}

impl SaveScope {
    /// Widen the scope; never narrows
    pub fn raise(&mut self, scope: SaveScope) {
        if scope > *self {
            *self = scope;
        }
    }
}

// ----------------------------------------------------------------------------
// Key Selection
// ----------------------------------------------------------------------------

/// Which of the peer's keys an operation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySlot {
    /// The key learned through a third party's gossip header
    Gossip,
    /// The key the peer announced in its own Autocrypt header
    Public,
}

/// Verification requirement for key lookup and verification marking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VerificationLevel {
    #[default]
    NotVerified = 0,
    /// Both sides confirmed each other's key out-of-band
    Bidirectional = 2,
}

// ----------------------------------------------------------------------------
// Peer State
// ----------------------------------------------------------------------------

/// Trust state of a single correspondent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerState {
    addr: String,
    last_seen: Timestamp,
    last_seen_autocrypt: Timestamp,
    prefer_encrypt: PreferEncrypt,
    public_key: Option<PublicKey>,
    public_key_fingerprint: Option<Fingerprint>,
    gossip_key: Option<PublicKey>,
    gossip_key_fingerprint: Option<Fingerprint>,
    gossip_timestamp: Timestamp,
    verified_key: Option<PublicKey>,
    verified_key_fingerprint: Option<Fingerprint>,
    #[serde(skip)]
    degrade_event: DegradeEvent,
    #[serde(skip)]
    to_save: SaveScope,
}

impl PeerState {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a peer's own Autocrypt header
    pub fn from_header(header: &AutocryptHeader, message_time: Timestamp) -> Option<Self> {
        let mut peerstate = Self::new();
        peerstate
            .init_from_header(header, message_time)
            .then_some(peerstate)
    }

    /// Build a record from a gossip header
    pub fn from_gossip(header: &AutocryptHeader, message_time: Timestamp) -> Option<Self> {
        let mut peerstate = Self::new();
        peerstate
            .init_from_gossip(header, message_time)
            .then_some(peerstate)
    }

    // ----------------------------------------------------------------------------
    // Accessors
    // ----------------------------------------------------------------------------

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn last_seen(&self) -> Timestamp {
        self.last_seen
    }

    pub fn last_seen_autocrypt(&self) -> Timestamp {
        self.last_seen_autocrypt
    }

    pub fn prefer_encrypt(&self) -> PreferEncrypt {
        self.prefer_encrypt
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    pub fn public_key_fingerprint(&self) -> Option<&Fingerprint> {
        self.public_key_fingerprint.as_ref()
    }

    pub fn gossip_key(&self) -> Option<&PublicKey> {
        self.gossip_key.as_ref()
    }

    pub fn gossip_key_fingerprint(&self) -> Option<&Fingerprint> {
        self.gossip_key_fingerprint.as_ref()
    }

    pub fn gossip_timestamp(&self) -> Timestamp {
        self.gossip_timestamp
    }

    pub fn verified_key(&self) -> Option<&PublicKey> {
        self.verified_key.as_ref()
    }

    pub fn verified_key_fingerprint(&self) -> Option<&Fingerprint> {
        self.verified_key_fingerprint.as_ref()
    }

    /// Fingerprint identifying this peer: the public key's, else the gossip key's
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.public_key_fingerprint
            .as_ref()
            .filter(|f| !f.is_empty())
            .or_else(|| self.gossip_key_fingerprint.as_ref().filter(|f| !f.is_empty()))
    }

    /// Degrade events raised since the last [`take_degrade_event`](Self::take_degrade_event)
    pub fn degrade_event(&self) -> DegradeEvent {
        self.degrade_event
    }

    /// Return and acknowledge pending degrade events
    pub fn take_degrade_event(&mut self) -> DegradeEvent {
        core::mem::take(&mut self.degrade_event)
    }

    /// What has to be written back to storage
    pub fn to_save(&self) -> SaveScope {
        self.to_save
    }

    /// Mark the record as persisted
    pub fn mark_saved(&mut self) {
        self.to_save = SaveScope::Nothing;
    }

    pub(crate) fn copy_timestamps_from(&mut self, other: &PeerState) {
        self.last_seen = other.last_seen;
        self.last_seen_autocrypt = other.last_seen_autocrypt;
        self.gossip_timestamp = other.gossip_timestamp;
    }

    // ----------------------------------------------------------------------------
    // State Changes
    // ----------------------------------------------------------------------------

    /// Reset the record to a fresh observation of the peer's own header
    ///
    /// Returns `false` and leaves the record untouched if the header carries
    /// no key.
    pub fn init_from_header(&mut self, header: &AutocryptHeader, message_time: Timestamp) -> bool {
        if header.public_key.is_empty() {
            return false;
        }

        *self = Self::new();
        self.addr = header.addr.clone();
        self.last_seen = message_time;
        self.last_seen_autocrypt = message_time;
        self.to_save = SaveScope::All;
        self.prefer_encrypt = header.prefer_encrypt;
        self.public_key = Some(header.public_key.clone());
        self.recalc_fingerprint();
        true
    }

    /// Reset the record to a fresh observation of a gossip header
    pub fn init_from_gossip(&mut self, header: &AutocryptHeader, message_time: Timestamp) -> bool {
        if header.public_key.is_empty() {
            return false;
        }

        *self = Self::new();
        self.addr = header.addr.clone();
        self.gossip_timestamp = message_time;
        self.to_save = SaveScope::All;
        self.gossip_key = Some(header.public_key.clone());
        self.recalc_fingerprint();
        true
    }

    /// Merge a newly observed Autocrypt header
    ///
    /// Returns whether the header was applied. Headers for another address,
    /// without key or not newer than `last_seen_autocrypt` are ignored.
    pub fn apply_header(&mut self, header: &AutocryptHeader, message_time: Timestamp) -> bool {
        if !self.accepts(header) || !message_time.is_newer_than(self.last_seen_autocrypt) {
            return false;
        }

        self.last_seen = message_time;
        self.last_seen_autocrypt = message_time;
        self.to_save.raise(SaveScope::Timestamps);

        // A present header never asks for "reset"; switching from reset to
        // nopreference is fine here.
        if matches!(
            header.prefer_encrypt,
            PreferEncrypt::Mutual | PreferEncrypt::NoPreference
        ) && header.prefer_encrypt != self.prefer_encrypt
        {
            if self.prefer_encrypt == PreferEncrypt::Mutual {
                self.degrade_event.insert(DegradeEvent::ENCRYPTION_PAUSED);
            }
            self.prefer_encrypt = header.prefer_encrypt;
            self.to_save.raise(SaveScope::All);
        }

        if self.public_key.as_ref() != Some(&header.public_key) {
            self.public_key = Some(header.public_key.clone());
            self.recalc_fingerprint();
            self.to_save.raise(SaveScope::All);
        }

        true
    }

    /// Merge a newly observed gossip header
    pub fn apply_gossip(&mut self, header: &AutocryptHeader, message_time: Timestamp) -> bool {
        if !self.accepts(header) || !message_time.is_newer_than(self.gossip_timestamp) {
            return false;
        }

        self.gossip_timestamp = message_time;
        self.to_save.raise(SaveScope::Timestamps);

        if self.gossip_key.as_ref() != Some(&header.public_key) {
            self.gossip_key = Some(header.public_key.clone());
            self.recalc_fingerprint();
            self.to_save.raise(SaveScope::All);
        }

        true
    }

    /// The peer sent a message without Autocrypt header
    ///
    /// Only `last_seen` moves; no Autocrypt header was seen.
    pub fn degrade_encryption(&mut self, message_time: Timestamp) {
        if self.prefer_encrypt == PreferEncrypt::Mutual {
            self.degrade_event.insert(DegradeEvent::ENCRYPTION_PAUSED);
        }

        self.prefer_encrypt = PreferEncrypt::Reset;
        self.last_seen = message_time;
        self.to_save = SaveScope::All;
    }

    /// Recompute the fingerprints of the present keys
    ///
    /// A fingerprint that cannot be computed is stored as an empty string so
    /// the broken key is persisted instead of silently dropped. Replacing a
    /// known fingerprint raises [`DegradeEvent::FINGERPRINT_CHANGED`]; learning
    /// the first one does not.
    pub fn recalc_fingerprint(&mut self) {
        if let Some(key) = &self.public_key {
            let new = key.fingerprint();
            let old = self.public_key_fingerprint.replace(new.clone());
            Self::track_fingerprint_change(
                old,
                &new,
                &mut self.to_save,
                &mut self.degrade_event,
            );
        }

        if let Some(key) = &self.gossip_key {
            let new = key.fingerprint();
            let old = self.gossip_key_fingerprint.replace(new.clone());
            Self::track_fingerprint_change(
                old,
                &new,
                &mut self.to_save,
                &mut self.degrade_event,
            );
        }
    }

    fn track_fingerprint_change(
        old: Option<Fingerprint>,
        new: &Fingerprint,
        to_save: &mut SaveScope,
        degrade_event: &mut DegradeEvent,
    ) {
        let old = old.filter(|f| !f.is_empty());
        let unchanged = matches!(&old, Some(old) if old.matches(new.as_str()));
        if !unchanged {
            to_save.raise(SaveScope::All);
            if old.is_some() {
                degrade_event.insert(DegradeEvent::FINGERPRINT_CHANGED);
            }
        }
    }

    fn accepts(&self, header: &AutocryptHeader) -> bool {
        !self.addr.is_empty()
            && !header.public_key.is_empty()
            && addr_cmp(&self.addr, &header.addr)
    }

    // ----------------------------------------------------------------------------
    // Key Lookup and Verification
    // ----------------------------------------------------------------------------

    /// Key to encrypt to
    ///
    /// With a verification requirement only the verified key qualifies.
    /// Otherwise the public key is preferred over the gossip key. A present
    /// key without bytes voids the whole lookup.
    pub fn peek_key(&self, min_verified: VerificationLevel) -> Option<&PublicKey> {
        let has_empty_key = [&self.public_key, &self.gossip_key, &self.verified_key]
            .into_iter()
            .flatten()
            .any(PublicKey::is_empty);
        if has_empty_key {
            return None;
        }

        if min_verified != VerificationLevel::NotVerified {
            return self.verified_key.as_ref();
        }

        self.public_key.as_ref().or(self.gossip_key.as_ref())
    }

    /// Mark one of the keys as verified
    ///
    /// `fingerprint` is the fingerprint the caller compared out-of-band; it
    /// must still equal the current fingerprint of the chosen key so the key
    /// cannot change between comparison and marking. Only bidirectional
    /// verification is accepted.
    pub fn set_verified(
        &mut self,
        which: KeySlot,
        fingerprint: &str,
        level: VerificationLevel,
    ) -> bool {
        if level != VerificationLevel::Bidirectional {
            return false;
        }

        let (key, key_fingerprint) = match which {
            KeySlot::Public => (&self.public_key, &self.public_key_fingerprint),
            KeySlot::Gossip => (&self.gossip_key, &self.gossip_key_fingerprint),
        };

        match (key, key_fingerprint) {
            (Some(key), Some(key_fingerprint)) if key_fingerprint.matches(fingerprint) => {
                self.verified_key = Some(key.clone());
                self.verified_key_fingerprint = Some(key_fingerprint.clone());
                self.to_save.raise(SaveScope::All);
                true
            }
            _ => false,
        }
    }

    /// Render an `Autocrypt-Gossip` value for this peer
    ///
    /// The encryption preference is personal and never gossiped.
    pub fn render_gossip_header(&self, min_verified: VerificationLevel) -> Option<String> {
        if self.addr.is_empty() {
            return None;
        }

        let key = self.peek_key(min_verified)?;
        AutocryptHeader::new(self.addr.clone(), key.clone(), PreferEncrypt::NoPreference).render()
    }

    /// Whether the verified key is one of `fingerprints`
    pub fn has_verified_key(&self, fingerprints: &HashSet<Fingerprint>) -> bool {
        match (&self.verified_key, &self.verified_key_fingerprint) {
            (Some(_), Some(fingerprint)) => fingerprints.contains(fingerprint),
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "bob@example.com";

    fn key(seed: u8) -> PublicKey {
        PublicKey::from_bytes(vec![seed; 32])
    }

    fn header(key: PublicKey, prefer_encrypt: PreferEncrypt) -> AutocryptHeader {
        AutocryptHeader::new(ADDR, key, prefer_encrypt)
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::new(secs)
    }

    #[test]
    fn test_init_from_header() {
        let peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();

        assert_eq!(peerstate.addr(), ADDR);
        assert_eq!(peerstate.last_seen(), ts(10));
        assert_eq!(peerstate.last_seen_autocrypt(), ts(10));
        assert_eq!(peerstate.prefer_encrypt(), PreferEncrypt::Mutual);
        assert_eq!(peerstate.public_key(), Some(&key(1)));
        assert_eq!(peerstate.public_key_fingerprint(), Some(&key(1).fingerprint()));
        assert!(peerstate.gossip_key().is_none());
        assert!(peerstate.degrade_event().is_empty());
        assert_eq!(peerstate.to_save(), SaveScope::All);
    }

    #[test]
    fn test_init_without_key_is_noop() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        assert!(!peerstate.init_from_header(&header(PublicKey::empty(), PreferEncrypt::Mutual), ts(20)));
        assert_eq!(peerstate.public_key(), Some(&key(1)));
        assert!(PeerState::from_gossip(&header(PublicKey::empty(), PreferEncrypt::NoPreference), ts(1)).is_none());
    }

    #[test]
    fn test_init_from_gossip_keeps_preference() {
        let peerstate = PeerState::from_gossip(&header(key(2), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        assert_eq!(peerstate.prefer_encrypt(), PreferEncrypt::NoPreference);
        assert_eq!(peerstate.gossip_timestamp(), ts(10));
        assert_eq!(peerstate.last_seen(), Timestamp::ZERO);
        assert_eq!(peerstate.gossip_key_fingerprint(), Some(&key(2).fingerprint()));
        assert!(peerstate.public_key().is_none());
    }

    #[test]
    fn test_apply_header_requires_newer_timestamp() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        peerstate.mark_saved();

        assert!(!peerstate.apply_header(&header(key(2), PreferEncrypt::NoPreference), ts(10)));
        assert!(!peerstate.apply_header(&header(key(2), PreferEncrypt::NoPreference), ts(5)));
        assert_eq!(peerstate.public_key(), Some(&key(1)));
        assert_eq!(peerstate.prefer_encrypt(), PreferEncrypt::Mutual);
        assert_eq!(peerstate.last_seen(), ts(10));
        assert_eq!(peerstate.to_save(), SaveScope::Nothing);
    }

    #[test]
    fn test_apply_header_rejects_other_address() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        let foreign = AutocryptHeader::new("mallory@example.com", key(9), PreferEncrypt::Mutual);
        assert!(!peerstate.apply_header(&foreign, ts(20)));

        let same_addr_other_case =
            AutocryptHeader::new("BOB@Example.com", key(1), PreferEncrypt::Mutual);
        assert!(peerstate.apply_header(&same_addr_other_case, ts(20)));
    }

    #[test]
    fn test_apply_header_same_key_only_touches_timestamps() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        peerstate.mark_saved();

        assert!(peerstate.apply_header(&header(key(1), PreferEncrypt::Mutual), ts(20)));
        assert_eq!(peerstate.to_save(), SaveScope::Timestamps);
        assert_eq!(peerstate.last_seen_autocrypt(), ts(20));
        assert!(peerstate.degrade_event().is_empty());
    }

    #[test]
    fn test_key_change_raises_fingerprint_changed() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        assert!(peerstate.apply_header(&header(key(2), PreferEncrypt::Mutual), ts(20)));

        assert!(peerstate.degrade_event().contains(DegradeEvent::FINGERPRINT_CHANGED));
        assert!(!peerstate.degrade_event().contains(DegradeEvent::ENCRYPTION_PAUSED));
        assert_eq!(peerstate.public_key_fingerprint(), Some(&key(2).fingerprint()));
        assert_eq!(peerstate.to_save(), SaveScope::All);

        let acknowledged = peerstate.take_degrade_event();
        assert!(acknowledged.contains(DegradeEvent::FINGERPRINT_CHANGED));
        assert!(peerstate.degrade_event().is_empty());
    }

    #[test]
    fn test_first_public_key_after_gossip_is_not_a_change() {
        let mut peerstate = PeerState::from_gossip(&header(key(1), PreferEncrypt::NoPreference), ts(10))
            .unwrap();
        assert!(peerstate.apply_header(&header(key(2), PreferEncrypt::Mutual), ts(20)));
        assert!(peerstate.degrade_event().is_empty());
        assert_eq!(peerstate.public_key_fingerprint(), Some(&key(2).fingerprint()));
        assert_eq!(peerstate.gossip_key_fingerprint(), Some(&key(1).fingerprint()));
    }

    #[test]
    fn test_leaving_mutual_raises_encryption_paused() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        assert!(peerstate.apply_header(&header(key(1), PreferEncrypt::NoPreference), ts(20)));
        assert!(peerstate.degrade_event().contains(DegradeEvent::ENCRYPTION_PAUSED));
        assert_eq!(peerstate.prefer_encrypt(), PreferEncrypt::NoPreference);

        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::NoPreference), ts(10))
            .unwrap();
        assert!(peerstate.apply_header(&header(key(1), PreferEncrypt::Mutual), ts(20)));
        assert!(peerstate.degrade_event().is_empty());
        assert_eq!(peerstate.prefer_encrypt(), PreferEncrypt::Mutual);
    }

    #[test]
    fn test_degrade_encryption() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        peerstate.mark_saved();
        peerstate.degrade_encryption(ts(30));

        assert_eq!(peerstate.prefer_encrypt(), PreferEncrypt::Reset);
        assert!(peerstate.degrade_event().contains(DegradeEvent::ENCRYPTION_PAUSED));
        assert_eq!(peerstate.last_seen(), ts(30));
        assert_eq!(peerstate.last_seen_autocrypt(), ts(10));
        assert_eq!(peerstate.to_save(), SaveScope::All);

        // already reset: no second event
        peerstate.take_degrade_event();
        peerstate.degrade_encryption(ts(40));
        assert!(peerstate.degrade_event().is_empty());
    }

    #[test]
    fn test_apply_gossip_uses_own_timestamp() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(100))
            .unwrap();
        // gossip channel has never been seen, so an older message still counts
        assert!(peerstate.apply_gossip(&header(key(3), PreferEncrypt::Mutual), ts(50)));
        assert_eq!(peerstate.gossip_timestamp(), ts(50));
        assert_eq!(peerstate.gossip_key(), Some(&key(3)));
        assert_eq!(peerstate.prefer_encrypt(), PreferEncrypt::Mutual);
        assert_eq!(peerstate.last_seen_autocrypt(), ts(100));

        assert!(!peerstate.apply_gossip(&header(key(4), PreferEncrypt::Mutual), ts(50)));
        assert_eq!(peerstate.gossip_key(), Some(&key(3)));
    }

    #[test]
    fn test_peek_key_order() {
        let mut peerstate = PeerState::from_gossip(&header(key(3), PreferEncrypt::NoPreference), ts(10))
            .unwrap();
        assert_eq!(peerstate.peek_key(VerificationLevel::NotVerified), Some(&key(3)));

        peerstate.apply_header(&header(key(1), PreferEncrypt::Mutual), ts(20));
        assert_eq!(peerstate.peek_key(VerificationLevel::NotVerified), Some(&key(1)));
        assert_eq!(peerstate.peek_key(VerificationLevel::Bidirectional), None);

        let fingerprint = key(3).fingerprint();
        assert!(peerstate.set_verified(KeySlot::Gossip, fingerprint.as_str(), VerificationLevel::Bidirectional));
        assert_eq!(peerstate.peek_key(VerificationLevel::Bidirectional), Some(&key(3)));
        assert_eq!(peerstate.peek_key(VerificationLevel::NotVerified), Some(&key(1)));
    }

    #[test]
    fn test_peek_key_with_empty_key_returns_none() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        peerstate.gossip_key = Some(PublicKey::empty());
        assert_eq!(peerstate.peek_key(VerificationLevel::NotVerified), None);
    }

    #[test]
    fn test_set_verified_requires_matching_fingerprint() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        let fingerprint = key(1).fingerprint();
        let wrong = key(2).fingerprint();

        assert!(!peerstate.set_verified(KeySlot::Public, wrong.as_str(), VerificationLevel::Bidirectional));
        assert!(!peerstate.set_verified(KeySlot::Public, fingerprint.as_str(), VerificationLevel::NotVerified));
        assert!(!peerstate.set_verified(KeySlot::Gossip, fingerprint.as_str(), VerificationLevel::Bidirectional));
        assert!(!peerstate.set_verified(KeySlot::Public, "", VerificationLevel::Bidirectional));
        assert!(peerstate.verified_key().is_none());
        assert!(peerstate.verified_key_fingerprint().is_none());

        let lowercase = fingerprint.as_str().to_ascii_lowercase();
        assert!(peerstate.set_verified(KeySlot::Public, &lowercase, VerificationLevel::Bidirectional));
        assert_eq!(peerstate.verified_key(), Some(&key(1)));
        assert_eq!(peerstate.verified_key_fingerprint(), Some(&fingerprint));
        assert!(peerstate.verified_key().unwrap().ptr_eq(peerstate.public_key().unwrap()));
    }

    #[test]
    fn test_failed_verification_keeps_previous_verified_key() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        let fingerprint = key(1).fingerprint();
        assert!(peerstate.set_verified(KeySlot::Public, fingerprint.as_str(), VerificationLevel::Bidirectional));

        peerstate.apply_header(&header(key(2), PreferEncrypt::Mutual), ts(20));
        assert!(!peerstate.set_verified(KeySlot::Public, fingerprint.as_str(), VerificationLevel::Bidirectional));
        assert_eq!(peerstate.verified_key(), Some(&key(1)));
        assert_eq!(peerstate.verified_key_fingerprint(), Some(&fingerprint));
    }

    #[test]
    fn test_render_gossip_header_never_gossips_preference() {
        let peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        let rendered = peerstate
            .render_gossip_header(VerificationLevel::NotVerified)
            .unwrap();
        assert!(rendered.starts_with("addr=bob@example.com; keydata="));
        assert!(!rendered.contains("prefer-encrypt"));

        let parsed: AutocryptHeader = rendered.parse().unwrap();
        assert_eq!(parsed.public_key, key(1));

        assert!(peerstate
            .render_gossip_header(VerificationLevel::Bidirectional)
            .is_none());
        assert!(PeerState::new()
            .render_gossip_header(VerificationLevel::NotVerified)
            .is_none());
    }

    #[test]
    fn test_has_verified_key() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        let mut fingerprints = HashSet::new();
        fingerprints.insert(key(1).fingerprint());
        assert!(!peerstate.has_verified_key(&fingerprints));

        let fingerprint = key(1).fingerprint();
        peerstate.set_verified(KeySlot::Public, fingerprint.as_str(), VerificationLevel::Bidirectional);
        assert!(peerstate.has_verified_key(&fingerprints));

        let mut others = HashSet::new();
        others.insert(key(7).fingerprint());
        assert!(!peerstate.has_verified_key(&others));
    }

    #[test]
    fn test_recalc_marks_invalid_fingerprint_for_saving() {
        let mut peerstate = PeerState::from_header(&header(key(1), PreferEncrypt::Mutual), ts(10))
            .unwrap();
        peerstate.mark_saved();
        peerstate.public_key = Some(PublicKey::empty());
        peerstate.recalc_fingerprint();

        assert_eq!(peerstate.public_key_fingerprint(), Some(&Fingerprint::default()));
        assert!(peerstate.degrade_event().contains(DegradeEvent::FINGERPRINT_CHANGED));
        assert_eq!(peerstate.to_save(), SaveScope::All);
        assert!(peerstate.fingerprint().is_none());
    }
}
