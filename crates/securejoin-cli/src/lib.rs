//! Secure-Join CLI library
//!
//! Command handling, configuration and the file-backed account store for the
//! `securejoin` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod store;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use store::FileStorage;
