//! Peer identity extraction.
//!
//! Converts the facts a transport exposes after a completed handshake into a
//! normalized, read-only [`PeerIdentity`]. Extraction is diagnostic: it never
//! fails, and missing data is reported as [`UNKNOWN`]. Authorization itself is
//! decided by the transport's verification policy.

use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

use crate::net::transport::SessionFacts;

/// Sentinel for a value the transport exposed as empty.
pub const UNKNOWN: &str = "unknown";

/// Normalized summary of a negotiated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerIdentity {
    /// Negotiated protocol version, e.g. `TLSv1.3`.
    pub protocol: String,
    /// Negotiated cipher suite name.
    pub cipher: String,
    /// Whether the peer verified under the configured trust anchors.
    pub authorized: bool,
    /// Present only when the peer sent a readable certificate.
    pub cert: Option<CertificateDescriptor>,
}

/// Fields of the peer's end-entity certificate.
///
/// Every field is either a real value or [`UNKNOWN`], never an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateDescriptor {
    pub subject: String,
    pub issuer: String,
    pub valid_from: String,
    pub valid_to: String,
    /// SHA-256 over the DER encoding, colon-separated upper-case hex.
    pub fingerprint: String,
    /// Upper-case hex serial number.
    pub serial_number: String,
}

impl PeerIdentity {
    /// Build the identity snapshot for a completed handshake.
    pub fn from_session(facts: &SessionFacts) -> Self {
        Self {
            protocol: or_unknown(facts.protocol.as_deref()),
            cipher: or_unknown(facts.cipher.as_deref()),
            authorized: facts.authorized,
            cert: facts
                .peer_certificate
                .as_deref()
                .and_then(CertificateDescriptor::from_der),
        }
    }
}

impl CertificateDescriptor {
    /// Parse a DER certificate. `None` when the bytes are not a certificate.
    pub fn from_der(der: &[u8]) -> Option<Self> {
        let (_, cert) = X509Certificate::from_der(der).ok()?;
        let validity = cert.validity();

        Some(Self {
            subject: common_name(cert.subject()),
            issuer: common_name(cert.issuer()),
            valid_from: or_unknown(Some(&validity.not_before.to_string())),
            valid_to: or_unknown(Some(&validity.not_after.to_string())),
            fingerprint: fingerprint(der),
            serial_number: or_unknown(Some(&hex::encode_upper(cert.raw_serial()))),
        })
    }
}

fn common_name(name: &X509Name<'_>) -> String {
    let cn = name
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok());
    or_unknown(cn)
}

fn fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    digest
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn or_unknown(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}
