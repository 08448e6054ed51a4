//! TLS connection lifecycle manager.
//!
//! A client role ([`TlsClient`]) and a server role ([`TlsServer`]) share one
//! connection state machine ([`ConnectionLifecycle`]) and one notification
//! contract ([`NotificationEvent`]).

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;

pub use client::TlsClient;
pub use config::{ClientConfig, ServerConfig, VerifyPolicy};
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use events::{EventKind, NotificationEvent, ServerEvent};
pub use identity::{CertificateDescriptor, PeerIdentity};
pub use lifecycle::Shutdown;
pub use net::connection::ConnectionId;
pub use net::lifecycle::{ConnectionLifecycle, LifecycleOptions};
pub use net::state::LifecycleState;
pub use net::tls::RustlsTransport;
pub use server::TlsServer;
