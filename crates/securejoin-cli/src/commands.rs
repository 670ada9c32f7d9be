//! Command handlers for the Secure-Join CLI

use rand_core::{OsRng, RngCore};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use securejoin_core::qr::qr_generation::generate_qr_svg;
use securejoin_core::{
    AutocryptHeader, ChatId, Context, CoreConfig, Database, Fingerprint, InboundMessage, KeySlot,
    MemoryContactDirectory, MessageSender, Origin, OutboundStep, PeerState, PreferEncrypt,
    PublicKey, QrIntent, SecureJoinError, Timestamp,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::store::FileStorage;

/// Bytes of a generated account key
const GENERATED_KEY_LEN: usize = 32;

// ----------------------------------------------------------------------------
// Message Sinks
// ----------------------------------------------------------------------------

/// Sender for the stand-alone CLI, which has no mail transport
#[derive(Debug, Default)]
pub struct LoggingSender;

impl MessageSender for LoggingSender {
    fn send_step(&self, step: OutboundStep) -> securejoin_core::Result<()> {
        warn!(
            "No transport configured, dropping step '{}' for chat {}",
            step.step, step.chat_id
        );
        Ok(())
    }
}

/// Sender handing steps to an in-process relay
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: UnboundedSender<OutboundStep>,
}

impl MessageSender for ChannelSender {
    fn send_step(&self, step: OutboundStep) -> securejoin_core::Result<()> {
        let name = step.step;
        self.tx
            .send(step)
            .map_err(|_| SecureJoinError::send_failed(name, "relay closed"))
    }
}

// ----------------------------------------------------------------------------
// Command Dispatch
// ----------------------------------------------------------------------------

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Init { addr, name, key } => {
                Self::handle_init_command(&config, &addr, name.as_deref(), key.as_deref())
            }
            Commands::Qr { svg } => Self::handle_qr_command(&config, svg.as_deref()),
            Commands::CheckQr { text } => Self::handle_check_qr_command(&config, &text),
            Commands::ImportHeader {
                header,
                gossip,
                time,
            } => Self::handle_import_header_command(&config, &header, gossip, time),
            Commands::Peer { peer } => Self::handle_peer_command(&config, &peer),
            Commands::Verify {
                addr,
                fingerprint,
                gossip,
            } => Self::handle_verify_command(&config, &addr, &fingerprint, gossip),
            Commands::Demo { unencrypted } => Self::handle_demo_command(&config, unencrypted).await,
        }
    }

    /// Open the account stored in the configured data directory
    pub fn open_context(config: &AppConfig) -> Result<Context> {
        let storage = FileStorage::open(config.store_path())?;
        info!("Using account store {}", storage.path().display());

        Ok(Context::new(
            config.core.clone(),
            Database::new(Box::new(storage)),
            Box::new(MemoryContactDirectory::new()),
            Box::new(LoggingSender),
        )?)
    }

    fn open_configured_context(config: &AppConfig) -> Result<Context> {
        let context = Self::open_context(config)?;
        if !context.is_configured()? {
            return Err(CliError::NotInitialized);
        }
        Ok(context)
    }

    /// Handle the init command
    fn handle_init_command(
        config: &AppConfig,
        addr: &str,
        name: Option<&str>,
        key: Option<&str>,
    ) -> Result<()> {
        let key = match key {
            Some(encoded) => PublicKey::from_bytes(hex::decode(encoded.trim())?),
            None => {
                let mut bytes = vec![0u8; GENERATED_KEY_LEN];
                OsRng.fill_bytes(&mut bytes);
                PublicKey::from_bytes(bytes)
            }
        };

        let context = Self::open_context(config)?;
        context.configure_self(addr, name, &key)?;

        println!("Configured {}", addr);
        println!("Fingerprint: {}", key.fingerprint());
        Ok(())
    }

    /// Handle the qr command
    fn handle_qr_command(config: &AppConfig, svg: Option<&str>) -> Result<()> {
        let context = Self::open_configured_context(config)?;
        let text = context.securejoin_qr()?;
        println!("{}", text);

        if let Some(path) = svg {
            let image = generate_qr_svg(&text, config.core.qr_min_dimension)?;
            std::fs::write(path, image)?;
            info!("Wrote invitation image to {}", path);
        }
        Ok(())
    }

    /// Handle the check-qr command
    fn handle_check_qr_command(config: &AppConfig, text: &str) -> Result<()> {
        let context = Self::open_context(config)?;
        let intent = context.check_qr(text);
        println!("{}", serde_json::to_string_pretty(&intent_json(&intent))?);
        Ok(())
    }

    /// Handle the import-header command
    fn handle_import_header_command(
        config: &AppConfig,
        header: &str,
        gossip: bool,
        time: Option<i64>,
    ) -> Result<()> {
        let context = Self::open_configured_context(config)?;
        let header: AutocryptHeader = header.parse()?;
        let message_time = time.map(Timestamp::new).unwrap_or_else(Timestamp::now);

        let peerstate = if gossip {
            context.receive_gossip_header(&header, message_time)?
        } else {
            context.receive_autocrypt_header(&header, message_time)?
        };

        match peerstate {
            Some(peerstate) => {
                println!("{}", serde_json::to_string_pretty(&peerstate_json(&peerstate))?)
            }
            None => println!("Ignored header about the account itself"),
        }
        Ok(())
    }

    /// Handle the peer command
    fn handle_peer_command(config: &AppConfig, peer: &str) -> Result<()> {
        let context = Self::open_context(config)?;
        let peerstate = if peer.contains('@') {
            context.peerstate(peer)?
        } else {
            context.peerstate_by_fingerprint(Fingerprint::normalize(peer).as_str())?
        };

        let peerstate = peerstate.ok_or_else(|| CliError::UnknownPeer(peer.to_string()))?;
        println!("{}", serde_json::to_string_pretty(&peerstate_json(&peerstate))?);
        Ok(())
    }

    /// Handle the verify command
    fn handle_verify_command(
        config: &AppConfig,
        addr: &str,
        fingerprint: &str,
        gossip: bool,
    ) -> Result<()> {
        let context = Self::open_configured_context(config)?;
        if context.peerstate(addr)?.is_none() {
            return Err(CliError::UnknownPeer(addr.to_string()));
        }

        let slot = if gossip { KeySlot::Gossip } else { KeySlot::Public };
        let fingerprint = Fingerprint::normalize(fingerprint);
        if context.mark_verified(addr, slot, fingerprint.as_str())? {
            println!("Verified {}", addr);
        } else {
            println!("Fingerprint does not match the current key of {}", addr);
        }
        Ok(())
    }

    /// Handle the demo command
    async fn handle_demo_command(config: &AppConfig, unencrypted: bool) -> Result<()> {
        let core = config.core.clone();
        let (alice, mut alice_rx) = DemoAccount::new(&core, "alice@example.org", "Alice")?;
        let (bob, mut bob_rx) = DemoAccount::new(&core, "bob@example.org", "Bob")?;

        // bob knows alice's key from an earlier message, but not verified
        let header = AutocryptHeader::new(alice.addr.clone(), alice.key.clone(), PreferEncrypt::Mutual);
        bob.context
            .receive_autocrypt_header(&header, Timestamp::now())?;

        let qr = alice.context.securejoin_qr()?;
        println!("Alice's invitation: {}", qr);

        let joiner_context = bob.context.clone();
        let joiner = tokio::task::spawn_blocking(move || joiner_context.join_securejoin(&qr));
        tokio::pin!(joiner);

        let result = loop {
            tokio::select! {
                result = &mut joiner => {
                    break result.map_err(|e| CliError::Demo(e.to_string()))?;
                }
                Some(step) = bob_rx.recv() => {
                    let decrypted = step.guarantee_e2ee;
                    alice.deliver(&bob, step, decrypted)?;
                }
                Some(step) = alice_rx.recv() => {
                    let decrypted = step.guarantee_e2ee && !unencrypted;
                    bob.deliver(&alice, step, decrypted)?;
                }
            }
        };

        match result {
            Ok(()) => {
                let fingerprint = alice.key.fingerprint();
                bob.context
                    .mark_verified(&alice.addr, KeySlot::Public, fingerprint.as_str())?;
                println!("Secure-Join succeeded, Bob verified {}", fingerprint);
                if let Some(peerstate) = bob.context.peerstate(&alice.addr)? {
                    println!("{}", serde_json::to_string_pretty(&peerstate_json(&peerstate))?);
                }
                Ok(())
            }
            Err(e) => {
                println!("Secure-Join failed: {}", e);
                Err(e.into())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Demo Accounts
// ----------------------------------------------------------------------------

/// A throwaway in-memory account whose steps go to a channel
struct DemoAccount {
    addr: String,
    key: PublicKey,
    context: std::sync::Arc<Context>,
}

impl DemoAccount {
    fn new(
        core: &CoreConfig,
        addr: &str,
        name: &str,
    ) -> Result<(Self, UnboundedReceiver<OutboundStep>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = Context::new(
            core.clone(),
            Database::in_memory(),
            Box::new(MemoryContactDirectory::new()),
            Box::new(ChannelSender { tx }),
        )?;

        let mut bytes = vec![0u8; GENERATED_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let key = PublicKey::from_bytes(bytes);
        context.configure_self(addr, Some(name), &key)?;

        let account = Self {
            addr: addr.to_string(),
            key,
            context: std::sync::Arc::new(context),
        };
        Ok((account, rx))
    }

    fn chat_with(&self, addr: &str) -> Result<ChatId> {
        let chat_id = self.context.with_contacts(|contacts| {
            let id = contacts.add_or_lookup_contact("", addr, Origin::IncomingUnknownFrom)?;
            contacts.create_chat_by_contact_id(id)
        })??;
        Ok(chat_id)
    }

    /// Receive a step message carrying the sender's Autocrypt header
    fn deliver(&self, from: &DemoAccount, step: OutboundStep, decrypted: bool) -> Result<()> {
        debug!(
            "{} receives '{}' from {} (encrypted: {})",
            self.addr, step.step, from.addr, decrypted
        );
        let header = AutocryptHeader::new(from.addr.clone(), from.key.clone(), PreferEncrypt::Mutual);
        self.context
            .receive_autocrypt_header(&header, Timestamp::now())?;
        let chat_id = self.chat_with(&from.addr)?;
        let msg = InboundMessage::with_step(chat_id, step.step, decrypted);
        self.context.handle_handshake_message(&msg)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

fn intent_json(intent: &QrIntent) -> serde_json::Value {
    json!({
        "state": intent.state.as_str(),
        "contact_id": intent.contact_id.map(|id| id.as_u32()),
        "text": intent.text,
        "return_tag": intent.return_tag,
        "fingerprint": intent.fingerprint.as_ref().map(|f| f.as_str()),
        "addr": intent.addr,
        "name": intent.name,
    })
}

fn peerstate_json(peerstate: &PeerState) -> serde_json::Value {
    let degrade = peerstate.degrade_event();
    json!({
        "addr": peerstate.addr(),
        "last_seen": peerstate.last_seen().as_secs(),
        "last_seen_autocrypt": peerstate.last_seen_autocrypt().as_secs(),
        "prefer_encrypt": peerstate.prefer_encrypt().to_string(),
        "public_key_fingerprint": peerstate.public_key_fingerprint().map(|f| f.as_str()),
        "gossip_key_fingerprint": peerstate.gossip_key_fingerprint().map(|f| f.as_str()),
        "gossip_timestamp": peerstate.gossip_timestamp().as_secs(),
        "verified_key_fingerprint": peerstate.verified_key_fingerprint().map(|f| f.as_str()),
        "degrade_event": degrade.bits(),
    })
}
