//! Scanned QR codes
//!
//! [`ScannedQr::parse`] splits a scanned text by scheme into a typed value;
//! [`check_qr`] validates it and classifies what can be done with it given
//! what is already known about the peer. Parsing never fails: anything that
//! is not understood is an [`QrState::Error`] or plain [`QrState::Text`].
//!
//! Accepted schemes, matched case-insensitively in this order:
//!
//! ```text
//! OPENPGP4FPR:<fingerprint>#v=<addr>&n=<name>&r=<return tag>
//! mailto:<addr>?subject=...
//! SMTP:<addr>:<subject>:<body>
//! MATMSG:TO:<addr>;SUB:<subject>;BODY:<body>;
//! BEGIN:VCARD ... N:<last>;<first> ... EMAIL;<params>:<addr> ...
//! ```

use serde::{Deserialize, Serialize};

use crate::contact::{ContactDirectory, Origin};
use crate::key::{Fingerprint, FINGERPRINT_HEX_LEN};
use crate::storage::Database;
use crate::types::ContactId;
use crate::util::{
    may_be_valid_addr, normalize_addr, normalize_name, strip_prefix_ignore_case, url_decode,
    url_decode_form, url_encode,
};
use crate::Result;

#[cfg(feature = "tracing")]
use tracing::{error, info};

#[cfg(not(feature = "tracing"))]
use log::{error, info};

pub const OPENPGP4FPR_SCHEME: &str = "OPENPGP4FPR:";
pub const MAILTO_SCHEME: &str = "mailto:";
pub const SMTP_SCHEME: &str = "SMTP:";
pub const MATMSG_SCHEME: &str = "MATMSG:";
pub const VCARD_BEGIN: &str = "BEGIN:VCARD";

const BAD_ADDRESS: &str = "Bad e-mail address.";
const BAD_FINGERPRINT_LENGTH: &str = "Bad fingerprint length in QR code.";

// ----------------------------------------------------------------------------
// Scheme Parsing
// ----------------------------------------------------------------------------

/// Scanned text split by scheme, not yet validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedQr {
    /// Fingerprint, optionally with the owner's address, name and return tag
    OpenPgp4Fpr {
        fingerprint: String,
        addr: Option<String>,
        name: Option<String>,
        return_tag: Option<String>,
    },
    Mailto { addr: String },
    Smtp { addr: String },
    /// `None` if the code has no `TO:` field
    MatMsg { addr: Option<String> },
    VCard {
        addr: Option<String>,
        name: Option<String>,
    },
    /// Anything else
    Text,
}

impl ScannedQr {
    /// Split scanned text by its scheme
    pub fn parse(qr: &str) -> Self {
        if let Some(payload) = strip_prefix_ignore_case(qr, OPENPGP4FPR_SCHEME) {
            parse_openpgp4fpr(payload)
        } else if let Some(payload) = strip_prefix_ignore_case(qr, MAILTO_SCHEME) {
            parse_mailto(payload)
        } else if let Some(payload) = strip_prefix_ignore_case(qr, SMTP_SCHEME) {
            parse_smtp(payload)
        } else if strip_prefix_ignore_case(qr, MATMSG_SCHEME).is_some() {
            parse_matmsg(qr)
        } else if strip_prefix_ignore_case(qr, VCARD_BEGIN).is_some() {
            parse_vcard(qr)
        } else {
            ScannedQr::Text
        }
    }
}

fn parse_openpgp4fpr(payload: &str) -> ScannedQr {
    let (fingerprint, fragment) = match payload.split_once('#') {
        Some((fingerprint, fragment)) => (fingerprint, Some(fragment)),
        None => (payload, None),
    };

    let mut addr = None;
    let mut name = None;
    let mut return_tag = None;

    if let Some(fragment) = fragment {
        let mut encoded_name = None;
        let mut encoded_tag = None;
        for param in fragment.split('&') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key {
                "v" => addr = Some(value.to_string()),
                "n" => encoded_name = Some(value),
                "r" => encoded_tag = Some(value),
                _ => {}
            }
        }

        // name and tag only mean something together with an address
        if addr.is_some() {
            name = encoded_name.map(|n| normalize_name(&url_decode_form(n)));
            return_tag = Some(encoded_tag.map(url_decode).unwrap_or_default());
        }
    }

    ScannedQr::OpenPgp4Fpr {
        fingerprint: fingerprint.to_string(),
        addr,
        name,
        return_tag,
    }
}

fn parse_mailto(payload: &str) -> ScannedQr {
    let addr = payload.split('?').next().unwrap_or_default();
    ScannedQr::Mailto {
        addr: addr.to_string(),
    }
}

fn parse_smtp(payload: &str) -> ScannedQr {
    let addr = payload.split(':').next().unwrap_or_default();
    ScannedQr::Smtp {
        addr: addr.to_string(),
    }
}

fn parse_matmsg(qr: &str) -> ScannedQr {
    // `TO:` inside subject or body is only a problem if TO: is not the first field
    let addr = qr.find("TO:").map(|start| {
        let rest = &qr[start + 3..];
        rest.split(';').next().unwrap_or_default().to_string()
    });
    ScannedQr::MatMsg { addr }
}

fn parse_vcard(qr: &str) -> ScannedQr {
    let mut addr = None;
    let mut name = None;

    for line in qr.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // `EMAIL;TYPE=work:` carries parameters after the property name
        let key = key.split(';').next().unwrap_or_default();

        if key.eq_ignore_ascii_case("EMAIL") {
            if addr.is_none() {
                addr = Some(value.split(';').next().unwrap_or_default().to_string());
            }
        } else if key.eq_ignore_ascii_case("N") {
            // `last;first;middle;prefix;suffix`, only the first two are used
            let fields: Vec<&str> = value.splitn(3, ';').take(2).collect();
            name = Some(normalize_name(&fields.join(",")));
        }
    }

    ScannedQr::VCard { addr, name }
}

// ----------------------------------------------------------------------------
// QR Intent
// ----------------------------------------------------------------------------

/// What can be done with a scanned QR code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QrState {
    /// The code is malformed; see [`QrIntent::text`]
    Error,
    /// Fingerprint of a known peer
    FingerprintOk,
    /// Fingerprint of an unknown peer, no address to contact it
    FingerprintWithoutAddr,
    /// Fingerprint and address; out-of-band verification can be joined
    FingerprintAskOob,
    /// The scanned fingerprint differs from what is known for the address
    FingerprintMismatch,
    /// An address without fingerprint
    Addr,
    /// Plain text; see [`QrIntent::text`]
    Text,
}

impl QrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QrState::Error => "error",
            QrState::FingerprintOk => "fingerprint-ok",
            QrState::FingerprintWithoutAddr => "fingerprint-without-addr",
            QrState::FingerprintAskOob => "fingerprint-ask-oob",
            QrState::FingerprintMismatch => "fingerprint-mismatch",
            QrState::Addr => "addr",
            QrState::Text => "text",
        }
    }
}

impl core::fmt::Display for QrState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified scanned QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrIntent {
    pub state: QrState,
    /// Contact created or found for the code's address
    pub contact_id: Option<ContactId>,
    /// Error message or verbatim text
    pub text: Option<String>,
    /// Tag to echo back when joining; only set for [`QrState::FingerprintAskOob`]
    pub return_tag: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub addr: Option<String>,
    pub name: Option<String>,
}

impl QrIntent {
    fn new(state: QrState) -> Self {
        Self {
            state,
            contact_id: None,
            text: None,
            return_tag: None,
            fingerprint: None,
            addr: None,
            name: None,
        }
    }

    pub(crate) fn error<T: Into<String>>(text: T) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(QrState::Error)
        }
    }
}

// ----------------------------------------------------------------------------
// Validation and Classification
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Candidate {
    addr: Option<String>,
    fingerprint: Option<Fingerprint>,
    name: Option<String>,
    return_tag: Option<String>,
}

fn validate(scanned: ScannedQr) -> core::result::Result<Candidate, &'static str> {
    let mut candidate = match scanned {
        ScannedQr::OpenPgp4Fpr {
            fingerprint,
            addr,
            name,
            return_tag,
        } => Candidate {
            addr,
            fingerprint: Some(Fingerprint::normalize(&fingerprint)),
            name,
            return_tag,
        },
        ScannedQr::Mailto { addr } | ScannedQr::Smtp { addr } => Candidate {
            addr: Some(addr),
            ..Candidate::default()
        },
        ScannedQr::MatMsg { addr: None } => return Err(BAD_ADDRESS),
        ScannedQr::MatMsg { addr: Some(addr) } => Candidate {
            addr: Some(addr),
            ..Candidate::default()
        },
        ScannedQr::VCard { addr, name } => Candidate {
            addr,
            name,
            ..Candidate::default()
        },
        ScannedQr::Text => Candidate::default(),
    };

    if let Some(addr) = candidate.addr.take() {
        let addr = normalize_addr(&url_decode(&addr));
        if !may_be_valid_addr(&addr) {
            return Err(BAD_ADDRESS);
        }
        candidate.addr = Some(addr);
    }

    if let Some(fingerprint) = &candidate.fingerprint {
        if fingerprint.len() != FINGERPRINT_HEX_LEN {
            return Err(BAD_FINGERPRINT_LENGTH);
        }
    }

    Ok(candidate)
}

/// Check a scanned QR code
///
/// May create a contact for the address found in the code. Failures of the
/// storage or contact layer end up as an [`QrState::Error`] intent.
pub fn check_qr(qr: &str, db: &Database, contacts: &mut dyn ContactDirectory) -> QrIntent {
    match try_check_qr(qr, db, contacts) {
        Ok(intent) => intent,
        Err(e) => {
            error!("Cannot check QR code: {}", e);
            QrIntent::error(e.to_string())
        }
    }
}

/// Like [`check_qr`], but storage and contact failures are returned as errors
///
/// Malformed codes are still an `Ok` intent with [`QrState::Error`].
pub fn try_check_qr(
    qr: &str,
    db: &Database,
    contacts: &mut dyn ContactDirectory,
) -> Result<QrIntent> {
    info!("Scanned QR code: {}", qr);

    match validate(ScannedQr::parse(qr)) {
        Ok(candidate) => classify(qr, candidate, db, contacts),
        Err(message) => Ok(QrIntent::error(message)),
    }
}

fn classify(
    qr: &str,
    candidate: Candidate,
    db: &Database,
    contacts: &mut dyn ContactDirectory,
) -> Result<QrIntent> {
    let Candidate {
        addr,
        fingerprint,
        name,
        return_tag,
    } = candidate;
    let name_or_empty = name.clone().unwrap_or_default();

    let intent = match (fingerprint, addr) {
        (Some(fingerprint), None) => {
            match db.load_peerstate_by_fingerprint(fingerprint.as_str())? {
                Some(peerstate) => {
                    let addr = peerstate.addr().to_string();
                    let contact_id =
                        contacts.add_or_lookup_contact("", &addr, Origin::UnhandledQrScan)?;
                    QrIntent {
                        contact_id: Some(contact_id),
                        fingerprint: Some(fingerprint),
                        addr: Some(addr),
                        ..QrIntent::new(QrState::FingerprintOk)
                    }
                }
                None => QrIntent {
                    fingerprint: Some(fingerprint),
                    ..QrIntent::new(QrState::FingerprintWithoutAddr)
                },
            }
        }
        (Some(fingerprint), Some(addr)) => {
            let contact_id =
                contacts.add_or_lookup_contact(&name_or_empty, &addr, Origin::UnhandledQrScan)?;

            let known = db
                .load_peerstate_by_addr(&addr)?
                .and_then(|peerstate| peerstate.fingerprint().cloned());
            let state = match known {
                Some(known) if !known.matches(fingerprint.as_str()) => {
                    info!(
                        "Fingerprint mismatch for {}: Scanned: {}, saved: {}",
                        addr, fingerprint, known
                    );
                    QrState::FingerprintMismatch
                }
                _ => QrState::FingerprintAskOob,
            };

            QrIntent {
                contact_id: Some(contact_id),
                return_tag: (state == QrState::FingerprintAskOob)
                    .then(|| return_tag.unwrap_or_default()),
                fingerprint: Some(fingerprint),
                addr: Some(addr),
                name,
                ..QrIntent::new(state)
            }
        }
        (None, Some(addr)) => {
            let contact_id =
                contacts.add_or_lookup_contact(&name_or_empty, &addr, Origin::UnhandledQrScan)?;
            QrIntent {
                contact_id: Some(contact_id),
                addr: Some(addr),
                name,
                ..QrIntent::new(QrState::Addr)
            }
        }
        (None, None) => QrIntent {
            text: Some(qr.to_string()),
            ..QrIntent::new(QrState::Text)
        },
    };

    Ok(intent)
}

// ----------------------------------------------------------------------------
// Invitation Rendering
// ----------------------------------------------------------------------------

/// Text of an invitation QR code
pub fn render_invitation(
    fingerprint: &Fingerprint,
    addr: &str,
    name: &str,
    return_tag: &str,
) -> String {
    format!(
        "{}{}#v={}&n={}&r={}",
        OPENPGP4FPR_SCHEME,
        fingerprint,
        url_encode(addr),
        url_encode(name),
        return_tag
    )
}

// Feature-gated QR code image rendering
#[cfg(feature = "qr-generation")]
pub mod qr_generation {
    use qrcode::{render::svg, QrCode};

    use crate::{Result, SecureJoinError};

    /// Render QR code text as SVG
    pub fn generate_qr_svg(text: &str, min_dimension: u32) -> Result<String> {
        let qr_code = QrCode::new(text.as_bytes())
            .map_err(|e| SecureJoinError::qr_generation(format!("QR generation failed: {}", e)))?;

        let svg = qr_code
            .render::<svg::Color>()
            .min_dimensions(min_dimension, min_dimension)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#FFFFFF"))
            .build();

        Ok(svg)
    }

}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
