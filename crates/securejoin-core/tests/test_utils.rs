//! Test utilities for Secure-Join flows
//!
//! Two or more [`TestPeer`]s exchange handshake messages through in-memory
//! outboxes. Nothing is delivered until a test pumps the outboxes, so tests
//! decide about ordering, dropping and stripped encryption.

#![allow(dead_code)]

use securejoin_core::{
    AutocryptHeader, ChatId, Context, ContactDirectory, CoreConfig, Database, InboundMessage,
    MemoryContactDirectory, MessageSender, Origin, OutboundStep, PreferEncrypt, PublicKey,
    Result, Timestamp,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// ----------------------------------------------------------------------------
// Outbox
// ----------------------------------------------------------------------------

/// Message sender collecting step messages instead of sending them
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: Arc<Mutex<VecDeque<OutboundStep>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<OutboundStep> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageSender for Outbox {
    fn send_step(&self, step: OutboundStep) -> Result<()> {
        self.queue.lock().unwrap().push_back(step);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Test Peer
// ----------------------------------------------------------------------------

/// Deterministic key for a peer name
pub fn test_key(name: &str) -> PublicKey {
    PublicKey::from_bytes(format!("public key of {}", name).into_bytes())
}

/// An account with its own context and outbox
pub struct TestPeer {
    pub addr: String,
    pub key: PublicKey,
    pub context: Arc<Context>,
    pub outbox: Outbox,
}

impl TestPeer {
    /// Create a configured peer named `name` at `<name>@example.org`
    pub fn new(name: &str) -> Self {
        let addr = format!("{}@example.org", name);
        let key = test_key(name);
        let outbox = Outbox::new();
        let context = Context::new(
            CoreConfig::testing(),
            Database::in_memory(),
            Box::new(MemoryContactDirectory::new()),
            Box::new(outbox.clone()),
        )
        .unwrap();
        context.configure_self(&addr, Some(name), &key).unwrap();

        Self {
            addr,
            key,
            context: Arc::new(context),
            outbox,
        }
    }

    /// Learn `other`'s key as if it sent us a message with an Autocrypt header
    pub fn learn_key_of(&self, other: &TestPeer, message_time: i64) {
        let header = AutocryptHeader::new(other.addr.clone(), other.key.clone(), PreferEncrypt::Mutual);
        self.context
            .receive_autocrypt_header(&header, Timestamp::new(message_time))
            .unwrap();
    }

    /// The chat this peer uses for messages from `addr`
    pub fn chat_with(&self, addr: &str) -> ChatId {
        self.context
            .with_contacts(|contacts: &mut dyn ContactDirectory| {
                let id = contacts.add_or_lookup_contact("", addr, Origin::IncomingUnknownFrom)?;
                contacts.create_chat_by_contact_id(id)
            })
            .unwrap()
            .unwrap()
    }
}

// ----------------------------------------------------------------------------
// Delivery
// ----------------------------------------------------------------------------

/// Sending time of pumped messages; keys learned later win over their headers
pub const PUMP_MESSAGE_TIME: i64 = 1_000;

/// Deliver everything `from` has queued to `to`
///
/// Each message carries the sender's Autocrypt header. `decrypted` decides
/// how each message arrives; `None` drops it. Returns the number of delivered
/// messages.
pub fn pump_with<F>(from: &TestPeer, to: &TestPeer, mut decrypted: F) -> usize
where
    F: FnMut(&OutboundStep) -> Option<bool>,
{
    let mut delivered = 0;
    while let Some(step) = from.outbox.pop() {
        let Some(decrypted_and_validated) = decrypted(&step) else {
            continue;
        };
        to.learn_key_of(from, PUMP_MESSAGE_TIME);
        let chat_id = to.chat_with(&from.addr);
        let msg = InboundMessage::with_step(chat_id, step.step, decrypted_and_validated);
        assert!(to.context.is_handshake_message(&msg));
        to.context.handle_handshake_message(&msg).unwrap();
        delivered += 1;
    }
    delivered
}

/// Deliver with encryption exactly where the sender asked for it
pub fn pump(from: &TestPeer, to: &TestPeer) -> usize {
    pump_with(from, to, |step| Some(step.guarantee_e2ee))
}

/// Keep pumping both directions until `done` is set
pub fn relay_until(a: &TestPeer, b: &TestPeer, done: &AtomicBool) {
    while !done.load(Ordering::SeqCst) {
        pump(a, b);
        pump(b, a);
        thread::sleep(Duration::from_millis(2));
    }
}

/// Wait until `peer` has sent something, up to a generous timeout
pub fn wait_for_outbox(peer: &TestPeer) -> bool {
    for _ in 0..500 {
        if !peer.outbox.is_empty() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}
