//! Secure-Join CLI Configuration Management
//!
//! Configuration is read from a TOML file when one is given and otherwise
//! defaults. Command line flags override both.
//!
//! ```toml
//! [core]
//! join_poll_interval_ms = 300
//!
//! [cli]
//! data_dir = "/var/lib/securejoin"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use securejoin_core::CoreConfig;

use crate::error::{CliError, Result};

/// File name of the account store inside the data directory
pub const STORE_FILE_NAME: &str = "store.json";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Secure-Join CLI application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Handshake and invitation tunables
    pub core: CoreConfig,

    /// CLI-specific configuration
    pub cli: CliConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Directory holding the account store; platform data dir if unset
    pub data_dir: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file, filling gaps with defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        self.core
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;

        if let Some(dir) = &self.cli.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(CliError::Config("data_dir must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Directory holding the account store
    pub fn data_dir(&self) -> PathBuf {
        self.cli
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Path of the account store file
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join(STORE_FILE_NAME)
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("securejoin"))
            .unwrap_or_else(|| PathBuf::from(".securejoin"))
    }
}
