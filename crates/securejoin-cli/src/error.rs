//! Error handling for the Secure-Join CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Secure-Join core error: {0}")]
    Core(#[from] securejoin_core::SecureJoinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account not initialized; run `securejoin init` first")]
    NotInitialized,

    #[error("No peer state for {0}")]
    UnknownPeer(String),

    #[error("Demo failed: {0}")]
    Demo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
