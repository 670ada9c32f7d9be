//! Contacts and one-to-one chats
//!
//! The QR and handshake code only needs to create or look up a contact by
//! address and open a chat with it. [`ContactDirectory`] is that seam;
//! [`MemoryContactDirectory`] backs tests and the command-line tool.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, ContactId};
use crate::util::{addr_cmp, may_be_valid_addr, normalize_addr};
use crate::{Result, SecureJoinError};

// ----------------------------------------------------------------------------
// Contact Origin
// ----------------------------------------------------------------------------

/// How a contact came to be known
///
/// Origins are ordered; a contact keeps the highest origin it was seen with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Origin {
    Unknown = 0,
    /// Sender of a message from an unknown address
    IncomingUnknownFrom = 0x10,
    /// Address taken from a scanned QR code that was not acted on yet
    UnhandledQrScan = 0x80,
    /// Inviter of a Secure-Join handshake we joined
    SecureJoinJoined = 0x0200_0000,
    ManuallyCreated = 0x0400_0000,
}

impl Origin {
    fn rank(&self) -> u32 {
        *self as u32
    }
}

// ----------------------------------------------------------------------------
// Contact
// ----------------------------------------------------------------------------

/// A known correspondent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    /// Display name, empty if unknown
    pub name: String,
    pub addr: String,
    pub origin: Origin,
}

/// Contact and chat lookup used by QR handling and the handshake
pub trait ContactDirectory: Send {
    /// Look up a contact by address, creating it if unknown
    ///
    /// A non-empty `name` fills in a missing name. The stored origin is raised
    /// to `origin` if that is higher.
    fn add_or_lookup_contact(&mut self, name: &str, addr: &str, origin: Origin)
        -> Result<ContactId>;

    /// Find a contact by address, case-insensitively
    fn lookup_contact(&self, addr: &str) -> Option<Contact>;

    /// Get a contact by id
    fn get_contact(&self, id: ContactId) -> Option<Contact>;

    /// Get or create the one-to-one chat with a contact
    fn create_chat_by_contact_id(&mut self, id: ContactId) -> Result<ChatId>;
}

// ----------------------------------------------------------------------------
// In-Memory Directory
// ----------------------------------------------------------------------------

/// Contact directory kept in memory
#[derive(Debug)]
pub struct MemoryContactDirectory {
    contacts: Vec<Contact>,
    chats: HashMap<ContactId, ChatId>,
    next_contact_id: u32,
    next_chat_id: u32,
}

impl MemoryContactDirectory {
    /// First id handed out for ordinary contacts; lower ids are reserved
    pub const FIRST_CONTACT_ID: u32 = 10;

    pub fn new() -> Self {
        Self {
            contacts: Vec::new(),
            chats: HashMap::new(),
            next_contact_id: Self::FIRST_CONTACT_ID,
            next_chat_id: ChatId::LAST_SPECIAL.as_u32() + 1,
        }
    }

    /// All known contacts in creation order
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Chat with a contact, if one was created
    pub fn chat_for_contact(&self, id: ContactId) -> Option<ChatId> {
        self.chats.get(&id).copied()
    }
}

impl Default for MemoryContactDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactDirectory for MemoryContactDirectory {
    fn add_or_lookup_contact(
        &mut self,
        name: &str,
        addr: &str,
        origin: Origin,
    ) -> Result<ContactId> {
        let addr = normalize_addr(addr);
        if !may_be_valid_addr(&addr) {
            return Err(SecureJoinError::invalid_address(addr));
        }

        if let Some(contact) = self.contacts.iter_mut().find(|c| addr_cmp(&c.addr, &addr)) {
            if contact.name.is_empty() && !name.is_empty() {
                contact.name = name.to_string();
            }
            if origin.rank() > contact.origin.rank() {
                contact.origin = origin;
            }
            return Ok(contact.id);
        }

        let id = ContactId::new(self.next_contact_id);
        self.next_contact_id += 1;
        self.contacts.push(Contact {
            id,
            name: name.to_string(),
            addr,
            origin,
        });
        Ok(id)
    }

    fn lookup_contact(&self, addr: &str) -> Option<Contact> {
        let addr = normalize_addr(addr);
        self.contacts
            .iter()
            .find(|c| addr_cmp(&c.addr, &addr))
            .cloned()
    }

    fn get_contact(&self, id: ContactId) -> Option<Contact> {
        self.contacts.iter().find(|c| c.id == id).cloned()
    }

    fn create_chat_by_contact_id(&mut self, id: ContactId) -> Result<ChatId> {
        if self.get_contact(id).is_none() {
            return Err(SecureJoinError::storage_error(format!(
                "no contact with id {}",
                id
            )));
        }

        if let Some(chat_id) = self.chats.get(&id) {
            return Ok(*chat_id);
        }

        let chat_id = ChatId::new(self.next_chat_id);
        self.next_chat_id += 1;
        self.chats.insert(id, chat_id);
        Ok(chat_id)
    }
}
