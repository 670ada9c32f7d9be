//! Core configuration
//!
//! Tunables of the handshake and invitation code. Per-account identity
//! settings (own address, name and key) live in the [`Database`](crate::Database).

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, SecureJoinError};

/// Configuration for a [`Context`](crate::Context)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// How often the joiner checks for a result or cancellation, in milliseconds
    pub join_poll_interval_ms: u64,
    /// How many return tags of past invitations are remembered
    pub max_remembered_return_tags: usize,
    /// Random bytes per generated return tag
    pub return_tag_bytes: usize,
    /// Minimum edge length of rendered QR images, in pixels
    pub qr_min_dimension: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            join_poll_interval_ms: 300,
            max_remembered_return_tags: 10,
            return_tag_bytes: crate::util::CREATE_ID_BYTES,
            qr_min_dimension: 256,
        }
    }
}

impl CoreConfig {
    /// Configuration with a short poll interval for tests
    pub fn testing() -> Self {
        Self {
            join_poll_interval_ms: 10,
            ..Self::default()
        }
    }

    /// Poll interval of the joiner's wait loop
    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_interval_ms)
    }

    /// Reject values that would make the core spin or forget every invitation
    pub fn validate(&self) -> Result<()> {
        if self.join_poll_interval_ms == 0 {
            return Err(SecureJoinError::config_error(
                "join_poll_interval_ms must be greater than zero",
            ));
        }
        if self.max_remembered_return_tags == 0 {
            return Err(SecureJoinError::config_error(
                "max_remembered_return_tags must be greater than zero",
            ));
        }
        if self.return_tag_bytes == 0 {
            return Err(SecureJoinError::config_error(
                "return_tag_bytes must be greater than zero",
            ));
        }
        Ok(())
    }
}
