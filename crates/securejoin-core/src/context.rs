//! Account context
//!
//! A [`Context`] owns everything one account needs: configuration, the
//! database behind a single lock, the contact directory, the outgoing message
//! sink, the ongoing-operation guard and the handshake state. All methods
//! take `&self`; share the context between threads with an `Arc`.
//!
//! Lock order is database, then contacts, then handshake. No lock is held
//! while a message is handed to the [`MessageSender`].

use std::sync::{Mutex, MutexGuard};
use std::thread;

use crate::aheader::AutocryptHeader;
use crate::config::CoreConfig;
use crate::contact::{ContactDirectory, Origin};
use crate::key::{Fingerprint, PublicKey};
use crate::ongoing::{OngoingGuard, OngoingToken};
use crate::peerstate::{KeySlot, PeerState, VerificationLevel};
use crate::qr::{self, QrIntent, QrState};
use crate::securejoin::{Handshake, InboundMessage, JoinStatus, JoinStep, MessageSender, OutboundStep};
use crate::storage::{
    Database, CONFIG_CONFIGURED_ADDR, CONFIG_DISPLAYNAME, CONFIG_RETURN_TAGS,
    CONFIG_SELF_PUBLIC_KEY,
};
use crate::types::{ChatId, Timestamp};
use crate::util::{addr_cmp, create_id_with_len, may_be_valid_addr, normalize_addr};
use crate::{HandshakeError, Result, SecureJoinError};

#[cfg(feature = "tracing")]
use tracing::{debug, error, info, warn};

#[cfg(not(feature = "tracing"))]
use log::{debug, error, info, warn};

// ----------------------------------------------------------------------------
// Network Status
// ----------------------------------------------------------------------------

/// Tells the context whether sending can work at all
pub trait NetworkStatus: Send + Sync {
    fn is_offline(&self) -> bool;
}

/// Network status for hosts that cannot tell
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl NetworkStatus for AlwaysOnline {
    fn is_offline(&self) -> bool {
        false
    }
}

// ----------------------------------------------------------------------------
// Context
// ----------------------------------------------------------------------------

/// One account's trust state and Secure-Join machinery
pub struct Context {
    config: CoreConfig,
    db: Mutex<Database>,
    contacts: Mutex<Box<dyn ContactDirectory>>,
    sender: Box<dyn MessageSender>,
    network: Box<dyn NetworkStatus>,
    ongoing: OngoingGuard,
    handshake: Mutex<Handshake>,
}

impl Context {
    /// Create a context; fails on invalid configuration
    pub fn new(
        config: CoreConfig,
        db: Database,
        contacts: Box<dyn ContactDirectory>,
        sender: Box<dyn MessageSender>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            db: Mutex::new(db),
            contacts: Mutex::new(contacts),
            sender,
            network: Box::new(AlwaysOnline),
            ongoing: OngoingGuard::new(),
            handshake: Mutex::new(Handshake::new()),
        })
    }

    /// Replace the network status source
    pub fn with_network(mut self, network: Box<dyn NetworkStatus>) -> Self {
        self.network = network;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The context's single-flight guard
    pub fn ongoing(&self) -> &OngoingGuard {
        &self.ongoing
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| SecureJoinError::lock_poisoned("database"))
    }

    fn lock_contacts(&self) -> Result<MutexGuard<'_, Box<dyn ContactDirectory>>> {
        self.contacts
            .lock()
            .map_err(|_| SecureJoinError::lock_poisoned("contacts"))
    }

    fn lock_handshake(&self) -> Result<MutexGuard<'_, Handshake>> {
        self.handshake
            .lock()
            .map_err(|_| SecureJoinError::lock_poisoned("handshake"))
    }

    /// Run `f` with the contact directory locked
    pub fn with_contacts<R>(&self, f: impl FnOnce(&mut dyn ContactDirectory) -> R) -> Result<R> {
        let mut contacts = self.lock_contacts()?;
        Ok(f(contacts.as_mut()))
    }

    // ----------------------------------------------------------------------------
    // Own Identity
    // ----------------------------------------------------------------------------

    /// Store the account's own address, display name and public key
    pub fn configure_self(
        &self,
        addr: &str,
        display_name: Option<&str>,
        public_key: &PublicKey,
    ) -> Result<()> {
        let addr = normalize_addr(addr);
        if !may_be_valid_addr(&addr) {
            return Err(SecureJoinError::invalid_address(addr));
        }
        if public_key.is_empty() {
            return Err(SecureJoinError::invalid_key("own public key is empty"));
        }

        let mut db = self.lock_db()?;
        db.set_config(CONFIG_CONFIGURED_ADDR, &addr)?;
        match display_name.filter(|n| !n.trim().is_empty()) {
            Some(name) => db.set_config(CONFIG_DISPLAYNAME, name.trim())?,
            None => db.delete_config(CONFIG_DISPLAYNAME)?,
        }
        db.set_config(CONFIG_SELF_PUBLIC_KEY, public_key.as_bytes())?;

        info!("Configured {} with key {}", addr, public_key.fingerprint());
        Ok(())
    }

    /// Own address, if configured
    pub fn self_addr(&self) -> Result<Option<String>> {
        self.lock_db()?.get_config(CONFIG_CONFIGURED_ADDR)
    }

    /// Own public key, if configured
    pub fn self_public_key(&self) -> Result<Option<PublicKey>> {
        let bytes: Option<Vec<u8>> = self.lock_db()?.get_config(CONFIG_SELF_PUBLIC_KEY)?;
        Ok(bytes.map(PublicKey::from_bytes))
    }

    pub fn is_configured(&self) -> Result<bool> {
        Ok(self.self_addr()?.is_some() && self.self_public_key()?.is_some())
    }

    fn is_self_addr(&self, db: &Database, addr: &str) -> Result<bool> {
        let self_addr: Option<String> = db.get_config(CONFIG_CONFIGURED_ADDR)?;
        Ok(self_addr.is_some_and(|own| addr_cmp(&own, addr)))
    }

    // ----------------------------------------------------------------------------
    // Peer States
    // ----------------------------------------------------------------------------

    /// Process the `Autocrypt` header of a received message
    ///
    /// Returns the updated peer state with any degrade events it raised, or
    /// `None` if the header is about the account itself.
    pub fn receive_autocrypt_header(
        &self,
        header: &AutocryptHeader,
        message_time: Timestamp,
    ) -> Result<Option<PeerState>> {
        self.update_peerstate(header, message_time, false)
    }

    /// Process an `Autocrypt-Gossip` header of a received message
    pub fn receive_gossip_header(
        &self,
        header: &AutocryptHeader,
        message_time: Timestamp,
    ) -> Result<Option<PeerState>> {
        self.update_peerstate(header, message_time, true)
    }

    fn update_peerstate(
        &self,
        header: &AutocryptHeader,
        message_time: Timestamp,
        gossip: bool,
    ) -> Result<Option<PeerState>> {
        let mut db = self.lock_db()?;
        if self.is_self_addr(&db, &header.addr)? {
            debug!("Ignoring Autocrypt header about ourselves");
            return Ok(None);
        }

        let peerstate = match db.load_peerstate_by_addr(&header.addr)? {
            Some(mut peerstate) => {
                if gossip {
                    peerstate.apply_gossip(header, message_time);
                } else {
                    peerstate.apply_header(header, message_time);
                }
                db.save_peerstate(&mut peerstate, false)?;
                peerstate
            }
            None => {
                let created = if gossip {
                    PeerState::from_gossip(header, message_time)
                } else {
                    PeerState::from_header(header, message_time)
                };
                let mut peerstate =
                    created.ok_or_else(|| SecureJoinError::invalid_header("missing keydata"))?;
                db.save_peerstate(&mut peerstate, true)?;
                peerstate
            }
        };

        if !peerstate.degrade_event().is_empty() {
            warn!(
                "Encryption degraded for {}: {:?}",
                peerstate.addr(),
                peerstate.degrade_event()
            );
        }
        Ok(Some(peerstate))
    }

    /// Process a message from `addr` that came without `Autocrypt` header
    ///
    /// A known peer falls back to "reset" if the message is newer than
    /// anything seen from it.
    pub fn receive_without_autocrypt(
        &self,
        addr: &str,
        message_time: Timestamp,
    ) -> Result<Option<PeerState>> {
        let mut db = self.lock_db()?;
        let Some(mut peerstate) = db.load_peerstate_by_addr(addr)? else {
            return Ok(None);
        };

        if message_time.is_newer_than(peerstate.last_seen()) {
            peerstate.degrade_encryption(message_time);
            db.save_peerstate(&mut peerstate, false)?;
        }
        Ok(Some(peerstate))
    }

    /// Stored peer state of an address
    pub fn peerstate(&self, addr: &str) -> Result<Option<PeerState>> {
        self.lock_db()?.load_peerstate_by_addr(addr)
    }

    /// Stored peer state owning a fingerprint
    pub fn peerstate_by_fingerprint(&self, fingerprint: &str) -> Result<Option<PeerState>> {
        self.lock_db()?.load_peerstate_by_fingerprint(fingerprint)
    }

    /// Mark a peer's key as verified after an out-of-band comparison
    ///
    /// Returns `false` if there is no such peer or the fingerprint does not
    /// match the chosen key.
    pub fn mark_verified(&self, addr: &str, which: KeySlot, fingerprint: &str) -> Result<bool> {
        let mut db = self.lock_db()?;
        let Some(mut peerstate) = db.load_peerstate_by_addr(addr)? else {
            return Ok(false);
        };

        if !peerstate.set_verified(which, fingerprint, VerificationLevel::Bidirectional) {
            warn!("Cannot verify {}: fingerprint does not match", addr);
            return Ok(false);
        }

        db.save_peerstate(&mut peerstate, false)?;
        info!("Verified {} key of {}", fingerprint, addr);
        Ok(true)
    }

    // ----------------------------------------------------------------------------
    // QR Codes
    // ----------------------------------------------------------------------------

    /// Check a scanned QR code; never fails, problems become error intents
    pub fn check_qr(&self, qr: &str) -> QrIntent {
        match self.try_check_qr(qr) {
            Ok(intent) => intent,
            Err(e) => {
                error!("Cannot check QR code: {}", e);
                QrIntent::error(e.to_string())
            }
        }
    }

    fn try_check_qr(&self, qr: &str) -> Result<QrIntent> {
        let db = self.lock_db()?;
        let mut contacts = self.lock_contacts()?;
        qr::try_check_qr(qr, &db, contacts.as_mut())
    }

    /// Text for a QR code inviting others to verify us
    ///
    /// Every call creates a fresh return tag and remembers it.
    pub fn securejoin_qr(&self) -> Result<String> {
        let return_tag = create_id_with_len(self.config.return_tag_bytes);

        let mut db = self.lock_db()?;
        let self_addr: String = db
            .get_config(CONFIG_CONFIGURED_ADDR)?
            .ok_or_else(|| SecureJoinError::not_configured(CONFIG_CONFIGURED_ADDR))?;
        let self_key = db
            .get_config::<Vec<u8>>(CONFIG_SELF_PUBLIC_KEY)?
            .map(PublicKey::from_bytes)
            .ok_or_else(|| SecureJoinError::not_configured(CONFIG_SELF_PUBLIC_KEY))?;
        let self_name: String = db.get_config(CONFIG_DISPLAYNAME)?.unwrap_or_default();

        let fingerprint = self_key.fingerprint();
        if fingerprint.is_empty() {
            return Err(SecureJoinError::invalid_key("cannot fingerprint own key"));
        }

        let mut return_tags: Vec<String> = db.get_config(CONFIG_RETURN_TAGS)?.unwrap_or_default();
        return_tags.insert(0, return_tag.clone());
        return_tags.truncate(self.config.max_remembered_return_tags);
        db.set_config(CONFIG_RETURN_TAGS, &return_tags)?;

        Ok(qr::render_invitation(
            &fingerprint,
            &self_addr,
            &self_name,
            &return_tag,
        ))
    }

    /// Invitation QR code as SVG
    #[cfg(feature = "qr-generation")]
    pub fn securejoin_qr_svg(&self) -> Result<String> {
        let text = self.securejoin_qr()?;
        qr::qr_generation::generate_qr_svg(&text, self.config.qr_min_dimension)
    }

    /// Return tags of the most recent invitations, newest first
    pub fn return_tags(&self) -> Result<Vec<String>> {
        Ok(self
            .lock_db()?
            .get_config(CONFIG_RETURN_TAGS)?
            .unwrap_or_default())
    }

    // ----------------------------------------------------------------------------
    // Secure-Join
    // ----------------------------------------------------------------------------

    /// Join the verification offered by a scanned invitation
    ///
    /// Blocks until the inviter completed the handshake, the handshake
    /// failed, or [`stop_ongoing_process`](Self::stop_ongoing_process) was
    /// called. Run it on a worker thread.
    pub fn join_securejoin(&self, qr: &str) -> Result<()> {
        info!("Joining Secure-Join ...");

        let token = self
            .ongoing
            .acquire()
            .ok_or(HandshakeError::AlreadyRunning)?;

        let intent = self.try_check_qr(qr)?;
        let (Some(contact_id), Some(fingerprint), Some(inviter_addr), QrState::FingerprintAskOob) =
            (intent.contact_id, intent.fingerprint, intent.addr, intent.state)
        else {
            warn!("QR code is not a Secure-Join invitation: {}", intent.state);
            return Err(HandshakeError::NotAnInvitation.into());
        };

        let chat_id = self.lock_contacts()?.create_chat_by_contact_id(contact_id)?;

        Self::check_exit(&token)?;

        if self.network.is_offline() {
            error!("Cannot join: {}", HandshakeError::Offline);
            return Err(HandshakeError::Offline.into());
        }

        Self::check_exit(&token)?;

        let request = self.lock_handshake()?.start_joining(
            chat_id,
            inviter_addr.clone(),
            fingerprint,
            intent.return_tag.unwrap_or_default(),
        )?;

        let result = self
            .send(request)
            .and_then(|_| self.wait_for_inviter(&token));

        let finished = self.lock_handshake()?.finish_joining();
        if result.is_ok() {
            self.lock_contacts()?.add_or_lookup_contact(
                "",
                &inviter_addr,
                Origin::SecureJoinJoined,
            )?;
        }
        if let (Err(e), Some(session)) = (&result, finished) {
            error!(
                "Secure-Join with chat {} failed (status {}): {}",
                session.chat_id,
                session.status.code(),
                e
            );
        }
        result
    }

    fn wait_for_inviter(&self, token: &OngoingToken<'_>) -> Result<()> {
        loop {
            match self.lock_handshake()?.joiner_status() {
                Some(JoinStatus::Succeeded) => return Ok(()),
                Some(JoinStatus::UnexpectedUnencrypted) => {
                    return Err(HandshakeError::UnexpectedUnencrypted.into())
                }
                Some(JoinStatus::FingerprintMismatch) => {
                    return Err(HandshakeError::FingerprintMismatch.into())
                }
                Some(JoinStatus::Pending) | None => {}
            }

            Self::check_exit(token)?;
            thread::sleep(self.config.join_poll_interval());
        }
    }

    fn check_exit(token: &OngoingToken<'_>) -> Result<()> {
        if token.shall_stop() {
            Err(HandshakeError::Cancelled.into())
        } else {
            Ok(())
        }
    }

    fn send(&self, step: OutboundStep) -> Result<()> {
        debug!("Sending Secure-Join step '{}' to chat {}", step.step, step.chat_id);
        let name = step.step;
        self.sender.send_step(step).map_err(|e| match e {
            SecureJoinError::Handshake(HandshakeError::SendFailed { .. }) => e,
            e => SecureJoinError::send_failed(name, e.to_string()),
        })
    }

    /// Whether a received message belongs to a handshake
    ///
    /// Such messages are passed to
    /// [`handle_handshake_message`](Self::handle_handshake_message) instead of
    /// being shown as ordinary messages.
    pub fn is_handshake_message(&self, msg: &InboundMessage) -> bool {
        msg.secure_join_step().is_some()
    }

    /// Advance the handshake with a received step message
    ///
    /// Out-of-order, unknown and misaddressed steps are logged and dropped.
    pub fn handle_handshake_message(&self, msg: &InboundMessage) -> Result<()> {
        if msg.chat_id.is_special() {
            debug!("Ignoring Secure-Join message in special chat {}", msg.chat_id);
            return Ok(());
        }

        let Some(value) = msg.secure_join_step() else {
            return Ok(());
        };
        let step: JoinStep = match value.parse() {
            Ok(step) => step,
            Err(e) => {
                warn!("{}", e);
                return Ok(());
            }
        };

        let sender_fingerprint = self.awaited_inviter_fingerprint(msg.chat_id)?;
        let reply = self.lock_handshake()?.handle_step(
            msg.chat_id,
            step,
            msg.decrypted_and_validated,
            sender_fingerprint.as_ref(),
        );
        match reply {
            Some(reply) => self.send(reply),
            None => Ok(()),
        }
    }

    /// Fingerprint of the key we know the awaited inviter in `chat_id` by
    ///
    /// The handshake lock is released before the database is locked.
    fn awaited_inviter_fingerprint(&self, chat_id: ChatId) -> Result<Option<Fingerprint>> {
        let inviter_addr = match self.lock_handshake()?.awaited_inviter(chat_id) {
            Some(addr) => addr.to_string(),
            None => return Ok(None),
        };

        Ok(self
            .lock_db()?
            .load_peerstate_by_addr(&inviter_addr)?
            .and_then(|peerstate| peerstate.fingerprint().cloned()))
    }

    // ----------------------------------------------------------------------------
    // Ongoing Operations
    // ----------------------------------------------------------------------------

    /// Run a long operation under the single-flight guard
    ///
    /// `f` should poll [`OngoingToken::shall_stop`] and return early when set.
    pub fn with_ongoing<T>(&self, f: impl FnOnce(&OngoingToken<'_>) -> Result<T>) -> Result<T> {
        let token = self
            .ongoing
            .acquire()
            .ok_or(HandshakeError::AlreadyRunning)?;
        f(&token)
    }

    /// Ask the running long operation to stop; returns without waiting
    pub fn stop_ongoing_process(&self) -> bool {
        self.ongoing.request_stop()
    }

    /// Fingerprint of the own key, if configured
    pub fn self_fingerprint(&self) -> Result<Option<Fingerprint>> {
        Ok(self
            .self_public_key()?
            .map(|key| key.fingerprint())
            .filter(|f| !f.is_empty()))
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("ongoing", &self.ongoing)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
