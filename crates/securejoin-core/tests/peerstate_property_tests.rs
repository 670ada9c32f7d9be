//! Property-based tests for peer state transitions
//!
//! These tests verify the invariants of the trust record under arbitrary
//! sequences of observed headers.

use proptest::prelude::*;
use securejoin_core::{
    AutocryptHeader, DegradeEvent, KeySlot, PeerState, PreferEncrypt, PublicKey, Timestamp,
    VerificationLevel,
};

const ADDR: &str = "bob@example.com";

/// Generate key bytes from a small pool so that repeats happen
fn arb_key() -> impl Strategy<Value = PublicKey> {
    (0u8..4).prop_map(|seed| PublicKey::from_bytes(vec![seed; 8]))
}

fn arb_prefer_encrypt() -> impl Strategy<Value = PreferEncrypt> {
    prop_oneof![
        Just(PreferEncrypt::NoPreference),
        Just(PreferEncrypt::Mutual),
        Just(PreferEncrypt::Reset),
    ]
}

fn arb_header() -> impl Strategy<Value = AutocryptHeader> {
    (arb_key(), arb_prefer_encrypt())
        .prop_map(|(key, prefer_encrypt)| AutocryptHeader::new(ADDR, key, prefer_encrypt))
}

/// Headers with strictly increasing timestamps
fn arb_header_sequence() -> impl Strategy<Value = Vec<(AutocryptHeader, Timestamp)>> {
    prop::collection::vec((arb_header(), 1i64..1000), 1..20).prop_map(|items| {
        let mut time = 0;
        items
            .into_iter()
            .map(|(header, step)| {
                time += step;
                (header, Timestamp::new(time))
            })
            .collect()
    })
}

fn fingerprint_variant(fingerprint: &str, lowercase: bool) -> String {
    if lowercase {
        fingerprint.to_ascii_lowercase()
    } else {
        fingerprint.to_string()
    }
}

proptest! {
    /// Property: the stored fingerprint always belongs to the current key
    #[test]
    fn fingerprint_follows_public_key(sequence in arb_header_sequence()) {
        let (first, first_time) = &sequence[0];
        let mut peerstate = PeerState::from_header(first, *first_time).unwrap();

        for (header, time) in &sequence[1..] {
            prop_assert!(peerstate.apply_header(header, *time));
            let key = peerstate.public_key().unwrap();
            prop_assert_eq!(peerstate.public_key_fingerprint(), Some(&key.fingerprint()));
            prop_assert_eq!(peerstate.public_key(), Some(&header.public_key));
        }
    }

    /// Property: a header that is not newer than the last one changes nothing
    #[test]
    fn stale_header_is_noop(
        initial in arb_header(),
        stale in arb_header(),
        time in 1i64..1000,
        age in 0i64..1000,
    ) {
        let mut peerstate = PeerState::from_header(&initial, Timestamp::new(time)).unwrap();
        peerstate.mark_saved();
        let before = peerstate.clone();

        prop_assert!(!peerstate.apply_header(&stale, Timestamp::new(time - age)));
        prop_assert_eq!(peerstate.prefer_encrypt(), before.prefer_encrypt());
        prop_assert_eq!(peerstate.public_key(), before.public_key());
        prop_assert_eq!(peerstate.public_key_fingerprint(), before.public_key_fingerprint());
        prop_assert_eq!(peerstate.last_seen(), before.last_seen());
        prop_assert_eq!(peerstate.last_seen_autocrypt(), before.last_seen_autocrypt());
        prop_assert!(peerstate.degrade_event().is_empty());
    }

    /// Property: fingerprint-changed fires iff a present key is replaced by a different one
    #[test]
    fn fingerprint_changed_iff_key_replaced(sequence in arb_header_sequence()) {
        let (first, first_time) = &sequence[0];
        let mut peerstate = PeerState::from_header(first, *first_time).unwrap();
        prop_assert!(!peerstate.degrade_event().contains(DegradeEvent::FINGERPRINT_CHANGED));

        for (header, time) in &sequence[1..] {
            let previous = peerstate.public_key().cloned();
            peerstate.take_degrade_event();
            peerstate.apply_header(header, *time);

            let replaced = previous.as_ref() != Some(&header.public_key);
            prop_assert_eq!(
                peerstate.degrade_event().contains(DegradeEvent::FINGERPRINT_CHANGED),
                replaced
            );
        }
    }

    /// Property: on the gossip channel, fingerprint-changed fires iff a gossiped key is replaced
    #[test]
    fn gossip_fingerprint_changed_iff_key_replaced(
        header in arb_header(),
        gossip in arb_header_sequence(),
    ) {
        let mut peerstate = PeerState::from_header(&header, Timestamp::new(1)).unwrap();

        for (gossiped, time) in &gossip {
            let previous = peerstate.gossip_key().cloned();
            peerstate.take_degrade_event();
            prop_assert!(peerstate.apply_gossip(gossiped, *time));

            let replaced = previous.is_some_and(|key| key != gossiped.public_key);
            prop_assert_eq!(
                peerstate.degrade_event().contains(DegradeEvent::FINGERPRINT_CHANGED),
                replaced
            );
            prop_assert_eq!(peerstate.gossip_key(), Some(&gossiped.public_key));
            prop_assert_eq!(
                peerstate.gossip_key_fingerprint(),
                Some(&gossiped.public_key.fingerprint())
            );
            // gossip never touches the key from the peer's own header
            prop_assert_eq!(peerstate.public_key(), Some(&header.public_key));
        }
    }

    /// Property: leaving "mutual" is the only way to pause encryption through headers
    #[test]
    fn encryption_paused_only_when_leaving_mutual(sequence in arb_header_sequence()) {
        let (first, first_time) = &sequence[0];
        let mut peerstate = PeerState::from_header(first, *first_time).unwrap();

        for (header, time) in &sequence[1..] {
            let was_mutual = peerstate.prefer_encrypt() == PreferEncrypt::Mutual;
            peerstate.take_degrade_event();
            peerstate.apply_header(header, *time);

            let paused = peerstate.degrade_event().contains(DegradeEvent::ENCRYPTION_PAUSED);
            let left_mutual = was_mutual && header.prefer_encrypt == PreferEncrypt::NoPreference;
            prop_assert_eq!(paused, left_mutual);
            // a header never asks for reset
            if header.prefer_encrypt != PreferEncrypt::Reset {
                prop_assert_eq!(peerstate.prefer_encrypt(), header.prefer_encrypt);
            }
        }
    }

    /// Property: verification succeeds iff bidirectional and the fingerprint is current
    #[test]
    fn set_verified_requires_current_fingerprint(
        header in arb_header(),
        candidate in arb_key(),
        bidirectional in any::<bool>(),
        lowercase in any::<bool>(),
        slot_is_public in any::<bool>(),
    ) {
        let mut peerstate = if slot_is_public {
            PeerState::from_header(&header, Timestamp::new(1)).unwrap()
        } else {
            PeerState::from_gossip(&header, Timestamp::new(1)).unwrap()
        };
        let slot = if slot_is_public { KeySlot::Public } else { KeySlot::Gossip };
        let level = if bidirectional {
            VerificationLevel::Bidirectional
        } else {
            VerificationLevel::NotVerified
        };
        let supplied = fingerprint_variant(candidate.fingerprint().as_str(), lowercase);

        let expected = bidirectional && candidate == header.public_key;
        prop_assert_eq!(peerstate.set_verified(slot, &supplied, level), expected);

        if expected {
            prop_assert_eq!(peerstate.verified_key(), Some(&header.public_key));
            prop_assert_eq!(peerstate.peek_key(VerificationLevel::Bidirectional), Some(&header.public_key));
        } else {
            prop_assert!(peerstate.verified_key().is_none());
            prop_assert!(peerstate.verified_key_fingerprint().is_none());
        }
    }

    /// Property: without a verified key, a verified lookup finds nothing
    #[test]
    fn verified_lookup_needs_verified_key(
        header in arb_header(),
        gossip in arb_header(),
        time in 1i64..1000,
    ) {
        let mut peerstate = PeerState::from_header(&header, Timestamp::new(time)).unwrap();
        peerstate.apply_gossip(&gossip, Timestamp::new(time));

        prop_assert!(peerstate.peek_key(VerificationLevel::Bidirectional).is_none());
        prop_assert_eq!(peerstate.peek_key(VerificationLevel::NotVerified), Some(&header.public_key));
    }
}

#[test]
fn test_failed_verification_keeps_earlier_verification() {
    let key = PublicKey::from_bytes(vec![1; 8]);
    let other = PublicKey::from_bytes(vec![2; 8]);
    let header = AutocryptHeader::new(ADDR, key.clone(), PreferEncrypt::Mutual);
    let mut peerstate = PeerState::from_header(&header, Timestamp::new(1)).unwrap();

    let fingerprint = key.fingerprint();
    assert!(peerstate.set_verified(KeySlot::Public, fingerprint.as_str(), VerificationLevel::Bidirectional));
    assert!(!peerstate.set_verified(
        KeySlot::Public,
        other.fingerprint().as_str(),
        VerificationLevel::Bidirectional
    ));
    assert_eq!(peerstate.verified_key(), Some(&key));
    assert_eq!(peerstate.verified_key_fingerprint(), Some(&fingerprint));
}

#[test]
fn test_gossip_for_other_address_is_ignored() {
    let key = PublicKey::from_bytes(vec![1; 8]);
    let other = PublicKey::from_bytes(vec![2; 8]);
    let header = AutocryptHeader::new(ADDR, key.clone(), PreferEncrypt::Mutual);
    let mut peerstate = PeerState::from_gossip(&header, Timestamp::new(10)).unwrap();
    peerstate.take_degrade_event();

    let foreign = AutocryptHeader::new("carol@example.com", other, PreferEncrypt::Mutual);
    assert!(!peerstate.apply_gossip(&foreign, Timestamp::new(20)));
    assert_eq!(peerstate.gossip_key(), Some(&key));
    assert_eq!(peerstate.gossip_key_fingerprint(), Some(&key.fingerprint()));
    assert_eq!(peerstate.gossip_timestamp(), Timestamp::new(10));
    assert!(peerstate.degrade_event().is_empty());

    // the address comparison ignores case
    let shouted = AutocryptHeader::new("BOB@Example.com", key.clone(), PreferEncrypt::Mutual);
    assert!(peerstate.apply_gossip(&shouted, Timestamp::new(30)));
    assert_eq!(peerstate.gossip_timestamp(), Timestamp::new(30));
}

#[test]
fn test_gossip_with_equal_timestamp_is_ignored() {
    let key = PublicKey::from_bytes(vec![1; 8]);
    let other = PublicKey::from_bytes(vec![2; 8]);
    let header = AutocryptHeader::new(ADDR, key.clone(), PreferEncrypt::Mutual);
    let mut peerstate = PeerState::from_gossip(&header, Timestamp::new(10)).unwrap();
    peerstate.take_degrade_event();

    let replacement = AutocryptHeader::new(ADDR, other.clone(), PreferEncrypt::Mutual);
    assert!(!peerstate.apply_gossip(&replacement, Timestamp::new(10)));
    assert_eq!(peerstate.gossip_key(), Some(&key));
    assert!(peerstate.degrade_event().is_empty());

    assert!(peerstate.apply_gossip(&replacement, Timestamp::new(11)));
    assert_eq!(peerstate.gossip_key(), Some(&other));
    assert!(peerstate
        .degrade_event()
        .contains(DegradeEvent::FINGERPRINT_CHANGED));
}
