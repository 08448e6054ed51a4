//! Configuration schema definitions.
//!
//! Two explicit shapes, one per role, each validated by its own rule set in
//! [`crate::config::validation`]. All types derive Serde traits for
//! deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::logging::LogLevel;

/// Root configuration file for the `tls-lifecycle` binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Settings for `tls-lifecycle serve`.
    pub server: Option<ServerConfig>,

    /// Settings for `tls-lifecycle connect`.
    pub client: Option<ClientConfig>,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Peer verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Abort the handshake when the peer cannot be verified.
    Enforce,
    /// Complete the handshake and report the outcome through `authorized`.
    Relax,
}

impl VerifyPolicy {
    pub fn from_reject_unauthorized(reject: bool) -> Self {
        if reject {
            VerifyPolicy::Enforce
        } else {
            VerifyPolicy::Relax
        }
    }
}

/// Outbound connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Remote host name or IP address.
    pub host: String,

    /// Remote port. Stored wide so out-of-range values reach validation.
    pub port: u32,

    /// Client certificate (PEM) for mutual TLS.
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Private key (PEM) matching `cert`.
    #[serde(default)]
    pub key: Option<PathBuf>,

    /// Trust anchors (PEM bundle). The webpki root set is used when absent.
    #[serde(default)]
    pub ca: Option<PathBuf>,

    /// Fail the handshake when the server cannot be verified.
    #[serde(default = "default_reject_unauthorized")]
    pub reject_unauthorized: bool,

    /// SNI / verification name. Defaults to `host`.
    #[serde(default)]
    pub servername: Option<String>,

    /// Cipher suite names overriding the provider defaults.
    #[serde(default)]
    pub ciphers: Option<Vec<String>>,

    /// Inactivity timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Upper bound for the graceful-close drain in milliseconds.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl ClientConfig {
    /// Minimal config for `host:port` with enforced verification.
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
            cert: None,
            key: None,
            ca: None,
            reject_unauthorized: default_reject_unauthorized(),
            servername: None,
            ciphers: None,
            timeout_ms: None,
            close_timeout_ms: default_close_timeout_ms(),
        }
    }

    pub fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy::from_reject_unauthorized(self.reject_unauthorized)
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Name presented in SNI and checked against the server certificate.
    pub fn server_name(&self) -> &str {
        self.servername.as_deref().unwrap_or(&self.host)
    }
}

/// Listening socket settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Bind port. Stored wide so out-of-range values reach validation.
    pub port: u32,

    /// Server certificate chain (PEM).
    pub cert: Option<PathBuf>,

    /// Private key (PEM) matching `cert`.
    pub key: Option<PathBuf>,

    /// Trust anchors (PEM bundle) for client certificates.
    #[serde(default)]
    pub ca: Option<PathBuf>,

    /// Ask connecting clients for a certificate.
    #[serde(default)]
    pub request_cert: bool,

    /// Reject clients whose certificate cannot be verified.
    #[serde(default = "default_reject_unauthorized")]
    pub reject_unauthorized: bool,

    /// Cipher suite names overriding the provider defaults.
    #[serde(default)]
    pub ciphers: Option<Vec<String>>,

    /// Per-peer inactivity timeout in milliseconds; also bounds the handshake.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Upper bound for the graceful-close drain in milliseconds.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Maximum concurrent peers (backpressure on accept).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl ServerConfig {
    /// Minimal config binding `0.0.0.0:port` with the given credentials.
    pub fn new(port: u32, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            host: default_server_host(),
            port,
            cert: Some(cert.into()),
            key: Some(key.into()),
            ca: None,
            request_cert: false,
            reject_unauthorized: default_reject_unauthorized(),
            ciphers: None,
            timeout_ms: None,
            close_timeout_ms: default_close_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }

    pub fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy::from_reject_unauthorized(self.reject_unauthorized)
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// `host:port` string handed to the socket layer.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Minimum log level.
    pub log_level: LogLevel,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

fn default_reject_unauthorized() -> bool {
    true
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults_enforce_verification() {
        let config: ClientConfig = toml::from_str("host = \"localhost\"\nport = 8443").unwrap();
        assert_eq!(config.verify_policy(), VerifyPolicy::Enforce);
        assert_eq!(config.server_name(), "localhost");
        assert!(config.inactivity_timeout().is_none());
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn server_bind_address_brackets_ipv6() {
        let mut config = ServerConfig::new(8443, "cert.pem", "key.pem");
        assert_eq!(config.bind_address(), "0.0.0.0:8443");
        config.host = "::1".into();
        assert_eq!(config.bind_address(), "[::1]:8443");
    }

    #[test]
    fn out_of_range_port_survives_parsing() {
        let config: ServerConfig =
            toml::from_str("port = 70000\ncert = \"c.pem\"\nkey = \"k.pem\"").unwrap();
        assert_eq!(config.port, 70000);
    }
}
