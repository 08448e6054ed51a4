//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, timeouts)
//! - Check host syntax and credential pairing
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure: no filesystem access, credential bytes are resolved
//!   afterwards by [`crate::config::credentials`]
//! - Runs before any socket is opened

use std::fmt;

use rustls::pki_types::ServerName;

use crate::config::schema::{ClientConfig, ServerConfig};

/// A single rejected configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate an outbound connection config.
pub fn validate_client(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.host.trim().is_empty() {
        errors.push(ValidationError::new("host", "host is required"));
    } else if !is_valid_host(&config.host) {
        errors.push(ValidationError::new(
            "host",
            format!("malformed host {:?}", config.host),
        ));
    }

    if let Some(name) = &config.servername {
        if !is_valid_host(name) {
            errors.push(ValidationError::new(
                "servername",
                format!("malformed server name {:?}", name),
            ));
        }
    }

    check_port(config.port, &mut errors);

    match (&config.cert, &config.key) {
        (Some(_), None) => errors.push(ValidationError::new(
            "key",
            "a private key is required when a client certificate is configured",
        )),
        (None, Some(_)) => errors.push(ValidationError::new(
            "cert",
            "a client certificate is required when a private key is configured",
        )),
        _ => {}
    }

    check_ciphers(config.ciphers.as_deref(), &mut errors);
    check_timeout("timeout_ms", config.timeout_ms, &mut errors);

    finish(errors)
}

/// Validate a listening socket config.
pub fn validate_server(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_valid_host(&config.host) {
        errors.push(ValidationError::new(
            "host",
            format!("malformed bind host {:?}", config.host),
        ));
    }

    check_port(config.port, &mut errors);

    if config.cert.is_none() || config.key.is_none() {
        errors.push(ValidationError::new(
            "cert",
            "certificate and private key are required",
        ));
    }

    if config.max_connections == 0 {
        errors.push(ValidationError::new(
            "max_connections",
            "max_connections must be greater than zero",
        ));
    }

    check_ciphers(config.ciphers.as_deref(), &mut errors);
    check_timeout("timeout_ms", config.timeout_ms, &mut errors);

    finish(errors)
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_port(port: u32, errors: &mut Vec<ValidationError>) {
    if !(1..=u32::from(u16::MAX)).contains(&port) {
        errors.push(ValidationError::new(
            "port",
            format!("invalid port number {port}, must be between 1 and 65535"),
        ));
    }
}

fn check_ciphers(ciphers: Option<&[String]>, errors: &mut Vec<ValidationError>) {
    let Some(ciphers) = ciphers else {
        return;
    };
    if ciphers.is_empty() {
        errors.push(ValidationError::new(
            "ciphers",
            "cipher override must name at least one suite",
        ));
    }
    if ciphers.iter().any(|name| name.trim().is_empty()) {
        errors.push(ValidationError::new("ciphers", "empty cipher suite name"));
    }
}

fn check_timeout(field: &'static str, value: Option<u64>, errors: &mut Vec<ValidationError>) {
    if value == Some(0) {
        errors.push(ValidationError::new(field, "timeout must be greater than zero"));
    }
}

/// A host is valid when it is an IP literal or a syntactically valid DNS name.
fn is_valid_host(host: &str) -> bool {
    !host.is_empty() && ServerName::try_from(host.to_string()).is_ok()
}
