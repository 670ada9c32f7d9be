//! Persistence for peer states and account settings
//!
//! A [`Storage`] is a plain key/value store. [`Database`] layers the typed
//! peer-state and configuration records on top of it, encoded with bincode.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::key::Fingerprint;
use crate::peerstate::{PeerState, SaveScope};
use crate::{Result, SecureJoinError, StorageError};

#[cfg(feature = "tracing")]
use tracing::{debug, error};

#[cfg(not(feature = "tracing"))]
use log::{debug, error};

/// Own address of the configured account
pub const CONFIG_CONFIGURED_ADDR: &str = "configured_addr";
/// Own display name, may be unset
pub const CONFIG_DISPLAYNAME: &str = "displayname";
/// Own public key bytes
pub const CONFIG_SELF_PUBLIC_KEY: &str = "self_public_key";
/// Rolling list of return tags handed out in invitations, newest first
pub const CONFIG_RETURN_TAGS: &str = "return_tags";

const PEERSTATE_PREFIX: &str = "peerstate/";
const CONFIG_PREFIX: &str = "config/";

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Key-value storage backing a [`Database`]
pub trait Storage: Send + Sync {
    /// Store data under a key, replacing what was there
    fn store(&mut self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Retrieve data by key
    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete data by key
    fn delete(&mut self, key: &str) -> Result<()>;

    /// List all keys
    fn list_keys(&self) -> Result<Vec<String>>;

    /// Check if storage is available and accessible
    fn is_available(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Memory Storage Implementation
// ----------------------------------------------------------------------------

/// In-memory storage for tests and throwaway accounts
#[derive(Debug)]
pub struct MemoryStorage {
    data: BTreeMap<String, Vec<u8>>,
    available: bool,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            available: true,
        }
    }

    /// Simulate the backing store going away or coming back
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(StorageError::NotAvailable.into())
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn store(&mut self, key: &str, data: Vec<u8>) -> Result<()> {
        self.check_available()?;
        self.data.insert(key.to_string(), data);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.data.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.check_available()?;
        self.data.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self.data.keys().cloned().collect())
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// ----------------------------------------------------------------------------
// Database
// ----------------------------------------------------------------------------

/// Typed records on top of a [`Storage`]
///
/// Peer states are keyed by lowercased address so lookups are
/// case-insensitive while the record keeps the address as first seen.
pub struct Database {
    storage: Box<dyn Storage>,
}

impl Database {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Create a database over fresh in-memory storage
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    fn ensure_available(&self) -> Result<()> {
        if self.storage.is_available() {
            Ok(())
        } else {
            error!("Storage not available");
            Err(StorageError::NotAvailable.into())
        }
    }

    fn peerstate_key(addr: &str) -> String {
        format!("{}{}", PEERSTATE_PREFIX, addr.trim().to_lowercase())
    }

    fn read_peerstate(&self, key: &str) -> Result<Option<PeerState>> {
        match self.storage.retrieve(key)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| SecureJoinError::corrupt_record(key, e.to_string())),
            None => Ok(None),
        }
    }

    fn write_peerstate(&mut self, key: &str, peerstate: &PeerState) -> Result<()> {
        let bytes = bincode::serialize(peerstate)?;
        self.storage.store(key, bytes)
    }

    /// Load the peer state for an address
    pub fn load_peerstate_by_addr(&self, addr: &str) -> Result<Option<PeerState>> {
        self.ensure_available()?;
        if addr.trim().is_empty() {
            return Ok(None);
        }
        self.read_peerstate(&Self::peerstate_key(addr))
    }

    /// Load the peer state owning a fingerprint
    ///
    /// A record whose public key has the fingerprint wins over one that only
    /// knows it as gossip key.
    pub fn load_peerstate_by_fingerprint(&self, fingerprint: &str) -> Result<Option<PeerState>> {
        self.ensure_available()?;
        if fingerprint.is_empty() {
            return Ok(None);
        }

        let mut gossip_match = None;
        for key in self.storage.list_keys()? {
            if !key.starts_with(PEERSTATE_PREFIX) {
                continue;
            }
            let Some(peerstate) = self.read_peerstate(&key)? else {
                continue;
            };

            let matches = |f: Option<&Fingerprint>| f.is_some_and(|f| f.matches(fingerprint));
            if matches(peerstate.public_key_fingerprint()) {
                return Ok(Some(peerstate));
            }
            if gossip_match.is_none() && matches(peerstate.gossip_key_fingerprint()) {
                gossip_match = Some(peerstate);
            }
        }

        Ok(gossip_match)
    }

    /// Persist a peer state
    ///
    /// With `create` or a fully dirty record every field is written. A record
    /// with only moved timestamps updates the timestamps of the stored row;
    /// if there is no row yet the record is written in full. Clean records
    /// are left alone.
    pub fn save_peerstate(&mut self, peerstate: &mut PeerState, create: bool) -> Result<()> {
        self.ensure_available()?;
        if peerstate.addr().is_empty() {
            return Err(SecureJoinError::storage_error(
                "cannot save a peer state without address",
            ));
        }

        let key = Self::peerstate_key(peerstate.addr());
        let scope = if create {
            SaveScope::All
        } else {
            peerstate.to_save()
        };

        match scope {
            SaveScope::All => self.write_peerstate(&key, peerstate)?,
            SaveScope::Timestamps => match self.read_peerstate(&key)? {
                Some(mut stored) => {
                    stored.copy_timestamps_from(peerstate);
                    self.write_peerstate(&key, &stored)?;
                }
                None => self.write_peerstate(&key, peerstate)?,
            },
            SaveScope::Nothing => return Ok(()),
        }

        debug!("Saved peer state for {} ({:?})", peerstate.addr(), scope);
        peerstate.mark_saved();
        Ok(())
    }

    /// Read a typed configuration value
    pub fn get_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.ensure_available()?;
        let full_key = format!("{}{}", CONFIG_PREFIX, key);
        match self.storage.retrieve(&full_key)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| SecureJoinError::corrupt_record(full_key, e.to_string())),
            None => Ok(None),
        }
    }

    /// Write a typed configuration value
    pub fn set_config<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.ensure_available()?;
        let bytes = bincode::serialize(value)?;
        self.storage.store(&format!("{}{}", CONFIG_PREFIX, key), bytes)
    }

    /// Remove a configuration value
    pub fn delete_config(&mut self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.storage.delete(&format!("{}{}", CONFIG_PREFIX, key))
    }
}

impl core::fmt::Debug for Database {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Database")
            .field("available", &self.storage.is_available())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
