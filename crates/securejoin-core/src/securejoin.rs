//! Secure-Join handshake
//!
//! The joiner scanned the inviter's QR code and now proves to it, over an
//! encrypted exchange, that both sides hold each other's keys:
//!
//! ```text
//! joiner                                   inviter
//!   | -- request ---------------------------> |   (may be unencrypted)
//!   | <-------- please-provide-random-secret - |
//!   | -- random-secret ---------------------> |
//!   | <-------------------------- broadcast -- |
//! ```
//!
//! [`Handshake`] is the state of one context: the inviter side is stateless
//! and answers every step it receives, the joiner side keeps a single
//! [`JoinerSession`] that knows which step it expects next. Steps arriving out
//! of order are logged and dropped; an unencrypted step that must be
//! encrypted ends the joiner's session, and so does an inviter step signed
//! by another key than the one scanned from the QR code.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::key::Fingerprint;
use crate::types::ChatId;
use crate::{HandshakeError, Result, SecureJoinError};

#[cfg(feature = "tracing")]
use tracing::{debug, error, info, warn};

#[cfg(not(feature = "tracing"))]
use log::{debug, error, info, warn};

/// Header carrying the step name of a handshake message
pub const SECURE_JOIN_HEADER: &str = "Secure-Join";

// ----------------------------------------------------------------------------
// Steps and Roles
// ----------------------------------------------------------------------------

/// Side of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Shows the QR code and answers
    Inviter,
    /// Scanned the QR code and drives the exchange
    Joiner,
}

/// One message of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinStep {
    Request,
    PleaseProvideRandomSecret,
    RandomSecret,
    Broadcast,
}

impl JoinStep {
    /// Value of the `Secure-Join` header
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinStep::Request => "request",
            JoinStep::PleaseProvideRandomSecret => "please-provide-random-secret",
            JoinStep::RandomSecret => "random-secret",
            JoinStep::Broadcast => "broadcast",
        }
    }

    /// Who sends this step
    pub fn sender(&self) -> Role {
        match self {
            JoinStep::Request | JoinStep::RandomSecret => Role::Joiner,
            JoinStep::PleaseProvideRandomSecret | JoinStep::Broadcast => Role::Inviter,
        }
    }

    /// Only the opening request may travel unencrypted; the joiner might not
    /// have the inviter's key at that point
    pub fn requires_encryption(&self) -> bool {
        !matches!(self, JoinStep::Request)
    }

    /// Short marker body of a step message
    pub fn body(&self) -> String {
        format!("{}: {}", SECURE_JOIN_HEADER, self.as_str())
    }
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinStep {
    type Err = SecureJoinError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "request" => Ok(JoinStep::Request),
            "please-provide-random-secret" => Ok(JoinStep::PleaseProvideRandomSecret),
            "random-secret" => Ok(JoinStep::RandomSecret),
            "broadcast" => Ok(JoinStep::Broadcast),
            other => Err(SecureJoinError::invalid_header(format!(
                "unknown {} step: {}",
                SECURE_JOIN_HEADER, other
            ))),
        }
    }
}

/// Result of the joiner's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinStatus {
    /// Waiting for the inviter
    Pending,
    /// The inviter sent the final broadcast
    Succeeded,
    /// A step that must be encrypted arrived in plain text
    UnexpectedUnencrypted,
    /// The inviter's key is not the one scanned from the QR code
    FingerprintMismatch,
}

impl JoinStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JoinStatus::Pending)
    }

    /// Numeric status: 0 pending, 1 success, 400 and above failures
    pub fn code(&self) -> u16 {
        match self {
            JoinStatus::Pending => 0,
            JoinStatus::Succeeded => 1,
            JoinStatus::UnexpectedUnencrypted | JoinStatus::FingerprintMismatch => 400,
        }
    }
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// A step message to be sent by the messaging layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundStep {
    pub chat_id: ChatId,
    pub step: JoinStep,
    /// Marker body, `Secure-Join: <step>`
    pub text: String,
    /// The message must not leave unencrypted
    pub guarantee_e2ee: bool,
}

impl OutboundStep {
    pub fn new(chat_id: ChatId, step: JoinStep) -> Self {
        Self {
            chat_id,
            step,
            text: step.body(),
            guarantee_e2ee: step.requires_encryption(),
        }
    }
}

/// Sends step messages on behalf of the handshake
pub trait MessageSender: Send + Sync {
    /// Queue a step message for sending
    fn send_step(&self, step: OutboundStep) -> Result<()>;
}

/// An incoming message as seen by the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat the message was assigned to
    pub chat_id: ChatId,
    /// Header fields, in message order
    pub headers: Vec<(String, String)>,
    /// Whether the message was encrypted and signed by a known key
    pub decrypted_and_validated: bool,
}

impl InboundMessage {
    pub fn new(chat_id: ChatId, decrypted_and_validated: bool) -> Self {
        Self {
            chat_id,
            headers: Vec::new(),
            decrypted_and_validated,
        }
    }

    /// Message carrying a handshake step
    pub fn with_step(chat_id: ChatId, step: JoinStep, decrypted_and_validated: bool) -> Self {
        Self::new(chat_id, decrypted_and_validated).with_header(SECURE_JOIN_HEADER, step.as_str())
    }

    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Raw value of the `Secure-Join` header
    pub fn secure_join_step(&self) -> Option<&str> {
        self.header(SECURE_JOIN_HEADER)
    }
}

// ----------------------------------------------------------------------------
// Handshake State
// ----------------------------------------------------------------------------

/// The joiner's side of a running handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinerSession {
    /// Chat with the inviter
    pub chat_id: ChatId,
    /// Address of the inviter, as scanned
    pub inviter_addr: String,
    /// Fingerprint scanned from the inviter's QR code
    pub inviter_fingerprint: Fingerprint,
    /// Return tag from the QR code
    pub return_tag: String,
    /// Next step accepted from the inviter; `None` once finished
    pub expects: Option<JoinStep>,
    pub status: JoinStatus,
}

/// Handshake state of one context
#[derive(Debug, Default)]
pub struct Handshake {
    joiner: Option<JoinerSession>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a joiner session and return the opening request
    ///
    /// Fails if a session is already running; one join at a time.
    pub fn start_joining(
        &mut self,
        chat_id: ChatId,
        inviter_addr: String,
        inviter_fingerprint: Fingerprint,
        return_tag: String,
    ) -> Result<OutboundStep> {
        if self.joiner.is_some() {
            return Err(HandshakeError::AlreadyRunning.into());
        }

        self.joiner = Some(JoinerSession {
            chat_id,
            inviter_addr,
            inviter_fingerprint,
            return_tag,
            expects: Some(JoinStep::PleaseProvideRandomSecret),
            status: JoinStatus::Pending,
        });
        Ok(OutboundStep::new(chat_id, JoinStep::Request))
    }

    /// The running joiner session, if any
    pub fn joiner(&self) -> Option<&JoinerSession> {
        self.joiner.as_ref()
    }

    /// Address of the inviter whose steps are awaited in `chat_id`
    pub fn awaited_inviter(&self, chat_id: ChatId) -> Option<&str> {
        self.joiner
            .as_ref()
            .filter(|s| s.chat_id == chat_id && s.expects.is_some())
            .map(|s| s.inviter_addr.as_str())
    }

    /// Status of the joiner session, if any
    pub fn joiner_status(&self) -> Option<JoinStatus> {
        self.joiner.as_ref().map(|s| s.status)
    }

    /// End the joiner session and return its final state
    pub fn finish_joining(&mut self) -> Option<JoinerSession> {
        self.joiner.take()
    }

    /// Process one received step
    ///
    /// `sender_fingerprint` is the fingerprint of the key the sender is known
    /// by; the joiner compares it with the scanned one. Returns the step to
    /// send in reply, if any.
    pub fn handle_step(
        &mut self,
        chat_id: ChatId,
        step: JoinStep,
        decrypted_and_validated: bool,
        sender_fingerprint: Option<&Fingerprint>,
    ) -> Option<OutboundStep> {
        info!("Secure-Join message '{}' received in chat {}", step, chat_id);

        match step.sender() {
            Role::Joiner => self.handle_as_inviter(chat_id, step, decrypted_and_validated),
            Role::Inviter => self.handle_as_joiner(
                chat_id,
                step,
                decrypted_and_validated,
                sender_fingerprint,
            ),
        }
    }

    fn handle_as_inviter(
        &mut self,
        chat_id: ChatId,
        step: JoinStep,
        decrypted_and_validated: bool,
    ) -> Option<OutboundStep> {
        match step {
            // Without the joiner's key the reply cannot be encrypted; the
            // sending layer refuses that, so no extra check is needed here.
            JoinStep::Request => Some(OutboundStep::new(
                chat_id,
                JoinStep::PleaseProvideRandomSecret,
            )),
            JoinStep::RandomSecret => {
                if !decrypted_and_validated {
                    error!("{}", HandshakeError::UnexpectedUnencrypted);
                    return None;
                }
                // TODO: check the random secret and the joiner's fingerprint
                // once the step carries them
                Some(OutboundStep::new(chat_id, JoinStep::Broadcast))
            }
            JoinStep::PleaseProvideRandomSecret | JoinStep::Broadcast => None,
        }
    }

    fn handle_as_joiner(
        &mut self,
        chat_id: ChatId,
        step: JoinStep,
        decrypted_and_validated: bool,
        sender_fingerprint: Option<&Fingerprint>,
    ) -> Option<OutboundStep> {
        let session = match self.joiner.as_mut() {
            Some(session) if session.expects == Some(step) && session.chat_id == chat_id => {
                session
            }
            _ => {
                // may belong to another or an earlier handshake
                warn!("Unexpected Secure-Join message order: got '{}'", step);
                return None;
            }
        };

        if !decrypted_and_validated {
            Self::end_joining(session, JoinStatus::UnexpectedUnencrypted);
            return None;
        }

        let expected = &session.inviter_fingerprint;
        if !sender_fingerprint.is_some_and(|f| expected.matches(f.as_str())) {
            Self::end_joining(session, JoinStatus::FingerprintMismatch);
            return None;
        }

        match step {
            JoinStep::PleaseProvideRandomSecret => {
                session.expects = Some(JoinStep::Broadcast);
                Some(OutboundStep::new(session.chat_id, JoinStep::RandomSecret))
            }
            JoinStep::Broadcast => {
                Self::end_joining(session, JoinStatus::Succeeded);
                None
            }
            JoinStep::Request | JoinStep::RandomSecret => None,
        }
    }

    fn end_joining(session: &mut JoinerSession, status: JoinStatus) {
        match status {
            JoinStatus::UnexpectedUnencrypted => {
                error!("{}", HandshakeError::UnexpectedUnencrypted)
            }
            JoinStatus::FingerprintMismatch => {
                error!(
                    "{}: expected {}",
                    HandshakeError::FingerprintMismatch,
                    session.inviter_fingerprint
                )
            }
            _ => debug!("Secure-Join ended with status {}", status.code()),
        }
        session.expects = None;
        session.status = status;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
