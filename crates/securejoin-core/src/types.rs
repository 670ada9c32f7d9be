//! Core types for the Secure-Join protocol
//!
//! Newtypes for message times and the contact/chat handles handed out by the
//! contact directory.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Message time in seconds since the Unix epoch
///
/// Peer state transitions compare these strictly; an observation carrying the
/// same timestamp as the last one seen is a no-op.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The zero timestamp, used for "never seen"
    pub const ZERO: Self = Self(0);

    /// Create a new timestamp
    pub fn new(secs: i64) -> Self {
        Self(secs)
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_secs() as i64)
    }

    /// Get the raw seconds
    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Whether this timestamp is strictly later than `other`
    pub fn is_newer_than(&self, other: Timestamp) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Contact and Chat Identifiers
// ----------------------------------------------------------------------------

/// Handle of a contact in the contact directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(u32);

impl ContactId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChatId(u32);

impl ChatId {
    /// Highest id reserved for special chats (deaddrop, trash, ...)
    pub const LAST_SPECIAL: Self = Self(9);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this id refers to a special chat that carries no real conversation
    pub fn is_special(&self) -> bool {
        self.0 <= Self::LAST_SPECIAL.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
