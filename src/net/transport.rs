//! The secure transport seam.
//!
//! The lifecycle core never performs a handshake itself. A
//! [`SecureTransport`] turns validated settings into a connector (client) or
//! an acceptor (server); both yield a [`SecureStream`] once the handshake
//! completed, together with the session facts identity extraction needs.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{ClientSettings, ServerSettings};
use crate::error::{Result, TransportError};

/// Session facts exposed by the transport after a completed handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFacts {
    pub protocol: Option<String>,
    pub cipher: Option<String>,
    /// Peer chain verified against the configured trust anchors.
    pub authorized: bool,
    /// DER encoding of the peer's end-entity certificate.
    pub peer_certificate: Option<Vec<u8>>,
}

/// A handshaken, encrypted byte stream.
pub trait SecureStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn session_facts(&self) -> SessionFacts;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Boxed stream as stored by a lifecycle.
pub type BoxedStream = Box<dyn SecureStream>;

/// Opens one outbound secured connection.
#[async_trait]
pub trait SecureConnector: Send + Sync + 'static {
    type Stream: SecureStream;

    /// Connect and complete the handshake. Reports success or failure once.
    async fn connect(&self) -> Result<Self::Stream, TransportError>;
}

/// Completes the server side of a handshake on an accepted socket.
#[async_trait]
pub trait SecureAcceptor: Send + Sync + 'static {
    type Stream: SecureStream;

    async fn accept(&self, stream: TcpStream) -> Result<Self::Stream, TransportError>;
}

/// Factory for connectors and acceptors.
///
/// Both constructors run before any socket is opened and fail with
/// `InvalidConfiguration` when credential bytes or cipher names are unusable.
pub trait SecureTransport: Send + Sync + 'static {
    type Connector: SecureConnector;
    type Acceptor: SecureAcceptor;

    fn connector(&self, settings: &ClientSettings) -> Result<Self::Connector>;

    fn acceptor(&self, settings: &ServerSettings) -> Result<Self::Acceptor>;
}
