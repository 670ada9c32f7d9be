//! Secure-Join Core
//!
//! This crate tracks, per correspondent, which Autocrypt key is trusted and at
//! what level, and drives the out-of-band "Secure-Join" verification that
//! upgrades an opportunistically learned key to a verified one via a scanned
//! QR code and a short message exchange.
//!
//! Mail transport, MIME parsing and the OpenPGP primitives live outside this
//! crate; they are reached through the collaborator traits in [`storage`],
//! [`contact`] and [`securejoin`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod aheader;
pub mod config;
pub mod contact;
pub mod context;
pub mod errors;
pub mod key;
pub mod ongoing;
pub mod peerstate;
pub mod qr;
pub mod securejoin;
pub mod storage;
pub mod types;
pub mod util;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use aheader::{AutocryptHeader, PreferEncrypt};
pub use config::CoreConfig;
pub use contact::{Contact, ContactDirectory, MemoryContactDirectory, Origin};
pub use context::{AlwaysOnline, Context, NetworkStatus};
pub use errors::{HandshakeError, Result, SecureJoinError, StorageError};
pub use key::{Fingerprint, PublicKey};
pub use ongoing::{OngoingGuard, OngoingToken};
pub use peerstate::{DegradeEvent, KeySlot, PeerState, SaveScope, VerificationLevel};
pub use qr::{check_qr, render_invitation, QrIntent, QrState, ScannedQr};
pub use securejoin::{
    Handshake, InboundMessage, JoinStatus, JoinStep, JoinerSession, MessageSender, OutboundStep,
    Role, SECURE_JOIN_HEADER,
};
pub use storage::{Database, MemoryStorage, Storage};
pub use types::{ChatId, ContactId, Timestamp};
