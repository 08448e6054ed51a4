//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tls_lifecycle::config::{ClientSettings, CredentialLoader, ServerSettings};
use tls_lifecycle::net::transport::{
    SecureAcceptor, SecureConnector, SecureStream, SecureTransport, SessionFacts,
};
use tls_lifecycle::observability::logging::{LogContext, LogLevel, Logger};
use tls_lifecycle::{Result, TransportError};

/// Wait for the next message on `rx`, failing the test after five seconds.
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u32 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    u32::from(listener.local_addr().unwrap().port())
}

/// Logger keeping every record it is handed.
#[derive(Default)]
pub struct RecordingLogger {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    pub fn contains(&self, level: LogLevel, message: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m == message)
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, _context: LogContext<'_>) {
        self.records.lock().unwrap().push((level, message.to_string()));
    }
}

/// A throwaway CA and a `localhost` leaf it signed, written as PEM files.
pub struct TestPki {
    _dir: TempDir,
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TestPki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "tls-lifecycle test CA");
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        let write = |name: &str, pem: String| {
            let path = dir.path().join(name);
            std::fs::write(&path, pem).unwrap();
            path
        };
        let ca = write("ca.pem", ca_cert.pem());
        let cert = write("cert.pem", leaf.pem());
        let key = write("key.pem", leaf_key.serialize_pem());

        Self {
            _dir: dir,
            ca,
            cert,
            key,
        }
    }
}

/// Serves any path with fixed bytes.
pub struct StaticLoader;

impl CredentialLoader for StaticLoader {
    fn load(&self, _path: &Path) -> Result<Vec<u8>> {
        Ok(b"-----BEGIN TEST-----".to_vec())
    }
}

/// How the mock handshake resolves.
#[derive(Clone)]
pub enum Handshake {
    /// Succeed over an in-memory pipe; the far end goes to the test.
    Succeed,
    Fail(TransportError),
    /// Never complete.
    Hang,
}

/// In-memory transport counting every call that reaches it.
#[derive(Clone)]
pub struct MockTransport {
    handshake: Handshake,
    calls: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl MockTransport {
    pub fn new(handshake: Handshake) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            handshake,
            calls: Arc::new(AtomicUsize::new(0)),
            peers,
        };
        (transport, rx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn resolve<IO>(
        &self,
        wrap: impl FnOnce() -> IO,
    ) -> std::result::Result<MockStream<IO>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.handshake {
            Handshake::Succeed => Ok(MockStream(wrap())),
            Handshake::Fail(error) => Err(error.clone()),
            Handshake::Hang => std::future::pending().await,
        }
    }
}

impl SecureTransport for MockTransport {
    type Connector = MockTransport;
    type Acceptor = MockTransport;

    fn connector(&self, _settings: &ClientSettings) -> Result<MockTransport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }

    fn acceptor(&self, _settings: &ServerSettings) -> Result<MockTransport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }
}

#[async_trait]
impl SecureConnector for MockTransport {
    type Stream = MockStream<DuplexStream>;

    async fn connect(&self) -> std::result::Result<MockStream<DuplexStream>, TransportError> {
        self.resolve(|| {
            let (ours, theirs) = tokio::io::duplex(16 * 1024);
            let _ = self.peers.send(theirs);
            ours
        })
        .await
    }
}

#[async_trait]
impl SecureAcceptor for MockTransport {
    type Stream = MockStream<TcpStream>;

    async fn accept(
        &self,
        stream: TcpStream,
    ) -> std::result::Result<MockStream<TcpStream>, TransportError> {
        self.resolve(|| stream).await
    }
}

/// Plain stream reporting fixed TLS session facts.
pub struct MockStream<IO>(IO);

impl<IO> SecureStream for MockStream<IO>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn session_facts(&self) -> SessionFacts {
        SessionFacts {
            protocol: Some("TLSv1.3".to_string()),
            cipher: Some("TLS13_AES_256_GCM_SHA384".to_string()),
            authorized: false,
            peer_certificate: None,
        }
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for MockStream<IO> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl<IO: AsyncWrite + Unpin> AsyncWrite for MockStream<IO> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}
