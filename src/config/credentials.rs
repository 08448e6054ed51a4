//! Credential loading and resolved per-role settings.
//!
//! A [`ClientSettings`] or [`ServerSettings`] value only exists once its
//! config passed validation and every referenced credential path resolved to
//! bytes. The transport layer accepts nothing else.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::config::schema::{ClientConfig, ServerConfig, VerifyPolicy};
use crate::config::validation::{validate_client, validate_server};
use crate::error::{Error, Result};

/// Source of raw credential bytes.
pub trait CredentialLoader: Send + Sync {
    /// Read the bytes behind `path`, or fail with [`Error::CredentialNotFound`].
    fn load(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Reads credentials from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCredentialLoader;

impl CredentialLoader for FsCredentialLoader {
    fn load(&self, path: &Path) -> Result<Vec<u8>> {
        match std::fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Err(Error::invalid(
                "credential",
                format!("credential file is empty: {}", path.display()),
            )),
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::CredentialNotFound {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(Error::invalid(
                "credential",
                format!("unreadable credential {}: {}", path.display(), err),
            )),
        }
    }
}

/// A certificate chain and its private key, both PEM encoded.
#[derive(Clone)]
pub struct CredentialPair {
    pub cert_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("cert_chain", &format_args!("{} bytes", self.cert_chain.len()))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Validated client configuration with credential bytes loaded.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub server_name: String,
    pub identity: Option<CredentialPair>,
    pub trust_anchors: Option<Vec<u8>>,
    pub policy: VerifyPolicy,
    pub ciphers: Option<Vec<String>>,
    pub inactivity_timeout: Option<Duration>,
    pub close_timeout: Duration,
}

impl ClientSettings {
    /// Validate `config` and load every credential it references.
    pub fn resolve(config: &ClientConfig, loader: &dyn CredentialLoader) -> Result<Self> {
        validate_client(config).map_err(Error::InvalidConfiguration)?;

        let identity = match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => Some(CredentialPair {
                cert_chain: loader.load(cert)?,
                private_key: loader.load(key)?,
            }),
            _ => None,
        };
        let trust_anchors = load_optional(loader, config.ca.as_deref())?;

        Ok(Self {
            host: config.host.clone(),
            port: narrow_port(config.port)?,
            server_name: config.server_name().to_string(),
            identity,
            trust_anchors,
            policy: config.verify_policy(),
            ciphers: config.ciphers.clone(),
            inactivity_timeout: config.inactivity_timeout(),
            close_timeout: config.close_timeout(),
        })
    }

    /// `host:port` string handed to the socket layer.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Validated server configuration with credential bytes loaded.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_address: String,
    pub identity: CredentialPair,
    pub trust_anchors: Option<Vec<u8>>,
    pub request_cert: bool,
    pub policy: VerifyPolicy,
    pub ciphers: Option<Vec<String>>,
    pub inactivity_timeout: Option<Duration>,
    pub close_timeout: Duration,
    pub max_connections: usize,
}

impl ServerSettings {
    /// Validate `config` and load every credential it references.
    pub fn resolve(config: &ServerConfig, loader: &dyn CredentialLoader) -> Result<Self> {
        validate_server(config).map_err(Error::InvalidConfiguration)?;

        let (cert, key) = match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(Error::invalid(
                    "cert",
                    "certificate and private key are required",
                ))
            }
        };
        let identity = CredentialPair {
            cert_chain: loader.load(cert)?,
            private_key: loader.load(key)?,
        };
        let trust_anchors = load_optional(loader, config.ca.as_deref())?;

        Ok(Self {
            bind_address: config.bind_address(),
            identity,
            trust_anchors,
            request_cert: config.request_cert,
            policy: config.verify_policy(),
            ciphers: config.ciphers.clone(),
            inactivity_timeout: config.inactivity_timeout(),
            close_timeout: config.close_timeout(),
            max_connections: config.max_connections,
        })
    }
}

fn load_optional(loader: &dyn CredentialLoader, path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(|path| loader.load(path)).transpose()
}

fn narrow_port(port: u32) -> Result<u16> {
    u16::try_from(port).map_err(|_| Error::invalid("port", format!("invalid port number {port}")))
}
