//! Error taxonomy shared by the client and server roles.
//!
//! # Propagation
//! ```text
//! ValidationError(s) ─▶ Error::InvalidConfiguration   (before any I/O)
//! CredentialLoader   ─▶ Error::CredentialNotFound      (before any handshake)
//! SecureTransport    ─▶ TransportError ─▶ Error::Transport + notification
//! send outside Active ─▶ Error::NotActive              (local, no state change)
//! inactivity deadline ─▶ Error::TimedOut               (only while opening)
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::validation::ValidationError;

/// Errors surfaced by lifecycle, client and server operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration was rejected before any socket was opened, or an
    /// operation was invoked from a state that forbids it.
    #[error("invalid configuration: {}", join_errors(.0))]
    InvalidConfiguration(Vec<ValidationError>),

    /// A referenced credential file does not resolve to any bytes.
    #[error("credential not found: {}", .path.display())]
    CredentialNotFound { path: PathBuf },

    /// Handshake or socket failure reported by the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `send`/`write` was called while the connection was not Active.
    #[error("connection is not active")]
    NotActive,

    /// The inactivity deadline fired before the connection became Active.
    #[error("connection timed out")]
    TimedOut,
}

impl Error {
    /// Shorthand for a single-entry [`Error::InvalidConfiguration`].
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidConfiguration(vec![ValidationError::new(field, message)])
    }

    /// True for failures detected before the transport was touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfiguration(_) | Error::CredentialNotFound { .. }
        )
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for lifecycle operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// TCP connect or bind failed.
    Connect,
    /// TLS negotiation or peer verification failed.
    Handshake,
    /// The peer reset or aborted the connection.
    Reset,
    /// The peer sent data that could not be decrypted or parsed.
    Protocol,
    /// A transport-level deadline expired.
    TimedOut,
    /// Any other socket failure.
    Io,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Handshake => "handshake",
            TransportErrorKind::Reset => "reset",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::TimedOut => "timed out",
            TransportErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// A failure reported by the secure transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an I/O error raised after the handshake completed.
    pub fn from_io(err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportErrorKind::Reset,
            io::ErrorKind::InvalidData => TransportErrorKind::Protocol,
            io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }

    /// Classify an I/O error raised while the handshake was in progress.
    pub fn from_handshake_io(err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NotFound => TransportErrorKind::Connect,
            io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransportErrorKind::Reset
            }
            _ => TransportErrorKind::Handshake,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_configuration_lists_every_field() {
        let err = Error::InvalidConfiguration(vec![
            ValidationError::new("port", "must be between 1 and 65535"),
            ValidationError::new("host", "is required"),
        ]);
        let text = err.to_string();
        assert!(text.contains("port"));
        assert!(text.contains("host"));
        assert!(err.is_configuration());
    }

    #[test]
    fn io_errors_are_classified() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(TransportError::from_io(&reset).kind, TransportErrorKind::Reset);

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            TransportError::from_handshake_io(&refused).kind,
            TransportErrorKind::Connect
        );

        let bad_cert = io::Error::new(io::ErrorKind::InvalidData, "invalid peer certificate");
        assert_eq!(
            TransportError::from_handshake_io(&bad_cert).kind,
            TransportErrorKind::Handshake
        );
    }
}
