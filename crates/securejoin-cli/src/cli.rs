//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Data directory for the account store
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure the account's own address and key
    Init {
        /// Own e-mail address
        #[arg(short, long)]
        addr: String,
        /// Display name shown in invitations
        #[arg(short, long)]
        name: Option<String>,
        /// Public key bytes (hex); a random key is generated if omitted
        #[arg(short, long)]
        key: Option<String>,
    },
    /// Print a fresh Secure-Join invitation
    Qr {
        /// Also write the invitation as an SVG image to this path
        #[arg(long)]
        svg: Option<String>,
    },
    /// Classify scanned QR code text
    CheckQr {
        /// Scanned text
        text: String,
    },
    /// Feed a received Autocrypt header into the trust state
    ImportHeader {
        /// Header value, e.g. `addr=bob@example.org; keydata=...`
        header: String,
        /// Treat the value as an `Autocrypt-Gossip` header
        #[arg(short, long)]
        gossip: bool,
        /// Message time in seconds since the epoch; defaults to now
        #[arg(short, long)]
        time: Option<i64>,
    },
    /// Show the trust state stored for a peer
    Peer {
        /// Peer address or key fingerprint
        peer: String,
    },
    /// Mark a peer's key as verified after comparing its fingerprint
    Verify {
        /// Peer address
        addr: String,
        /// Fingerprint compared out-of-band
        fingerprint: String,
        /// Verify the gossiped key instead of the peer's own
        #[arg(short, long)]
        gossip: bool,
    },
    /// Run a Secure-Join between two throwaway accounts
    Demo {
        /// Strip the encryption of the inviter's replies
        #[arg(long)]
        unencrypted: bool,
    },
}
