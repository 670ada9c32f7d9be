//! Error types for the Secure-Join core
//!
//! Specific error enums for storage and handshake failures are unified under
//! the crate-level [`SecureJoinError`].

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage not available")]
    NotAvailable,
    #[error("Corrupt record under {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("{message}")]
    Generic { message: String },
}

/// Errors raised while driving a Secure-Join handshake
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Another ongoing process is already running")]
    AlreadyRunning,
    #[error("Ongoing process was cancelled")]
    Cancelled,
    #[error("Device is offline")]
    Offline,
    #[error("QR code does not offer out-of-band verification")]
    NotAnInvitation,
    #[error("Secure-Join message not encrypted but should be")]
    UnexpectedUnencrypted,
    #[error("Inviter's key does not match the scanned fingerprint")]
    FingerprintMismatch,
    #[error("Sending step {step} failed: {reason}")]
    SendFailed { step: String, reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Secure-Join crate
#[derive(Debug, thiserror::Error)]
pub enum SecureJoinError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Invalid Autocrypt header: {reason}")]
    InvalidHeader { reason: String },

    #[error("Invalid key material: {reason}")]
    InvalidKey { reason: String },

    #[error("Invalid address: {addr}")]
    InvalidAddress { addr: String },

    #[error("QR code error: {reason}")]
    QrGeneration { reason: String },

    #[error("Not configured: {missing}")]
    NotConfigured { missing: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// A lock guarding shared state was poisoned by a panicking thread
    #[error("Lock poisoned: {what}")]
    Lock { what: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl SecureJoinError {
    /// Create a generic storage error with a message
    pub fn storage_error<T: Into<String>>(message: T) -> Self {
        SecureJoinError::Storage(StorageError::Generic {
            message: message.into(),
        })
    }

    /// Create a send failure for a handshake step
    pub fn send_failed<S: ToString, R: Into<String>>(step: S, reason: R) -> Self {
        SecureJoinError::Handshake(HandshakeError::SendFailed {
            step: step.to_string(),
            reason: reason.into(),
        })
    }

    /// Create a corrupt-record storage error
    pub fn corrupt_record<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        SecureJoinError::Storage(StorageError::Corrupt {
            key: key.into(),
            reason: reason.into(),
        })
    }

    /// Create an invalid header error with a reason
    pub fn invalid_header<T: Into<String>>(reason: T) -> Self {
        SecureJoinError::InvalidHeader {
            reason: reason.into(),
        }
    }

    /// Create an invalid key error with a reason
    pub fn invalid_key<T: Into<String>>(reason: T) -> Self {
        SecureJoinError::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address<T: Into<String>>(addr: T) -> Self {
        SecureJoinError::InvalidAddress { addr: addr.into() }
    }

    /// Create a QR code rendering error
    pub fn qr_generation<T: Into<String>>(reason: T) -> Self {
        SecureJoinError::QrGeneration {
            reason: reason.into(),
        }
    }

    /// Create a not-configured error naming the missing setting
    pub fn not_configured<T: Into<String>>(missing: T) -> Self {
        SecureJoinError::NotConfigured {
            missing: missing.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        SecureJoinError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a lock poisoning error
    pub fn lock_poisoned<T: Into<String>>(what: T) -> Self {
        SecureJoinError::Lock { what: what.into() }
    }

    /// Whether the failure means the store could not be reached at all
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, SecureJoinError::Storage(StorageError::NotAvailable))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, SecureJoinError>;
