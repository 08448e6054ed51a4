//! rustls-backed secure transport.
//!
//! Turns resolved settings into a [`RustlsConnector`] or [`RustlsAcceptor`].
//! Credential bytes are PEM; the ring provider supplies every primitive.
//!
//! Under [`VerifyPolicy::Relax`] the handshake accepts any peer chain, and
//! the strict verifier is re-run afterwards only to report `authorized`.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    CommonState, DigitallySignedStruct, DistinguishedName, ProtocolVersion, RootCertStore,
    SignatureScheme, SupportedCipherSuite,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::config::{ClientSettings, CredentialPair, ServerSettings, VerifyPolicy};
use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::net::transport::{
    SecureAcceptor, SecureConnector, SecureStream, SecureTransport, SessionFacts,
};

/// The default transport: TLS 1.2/1.3 over TCP via rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsTransport;

impl SecureTransport for RustlsTransport {
    type Connector = RustlsConnector;
    type Acceptor = RustlsAcceptor;

    fn connector(&self, settings: &ClientSettings) -> Result<RustlsConnector> {
        let provider = provider(settings.ciphers.as_deref())?;
        let roots = Arc::new(trust_store(settings.trust_anchors.as_deref())?);
        let strict = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(&provider))
            .build()
            .map_err(|e| Error::invalid("ca", e.to_string()))?;

        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(tls_config_error)?;
        let builder = match settings.policy {
            VerifyPolicy::Enforce => builder.with_webpki_verifier(Arc::clone(&strict)),
            VerifyPolicy::Relax => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(RelaxedServerVerifier {
                    strict: Arc::clone(&strict),
                })),
        };
        let config = match &settings.identity {
            Some(identity) => {
                let (chain, key) = parse_identity(identity)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(tls_config_error)?
            }
            None => builder.with_no_client_auth(),
        };

        let server_name = ServerName::try_from(settings.server_name.clone())
            .map_err(|e| Error::invalid("servername", e.to_string()))?;

        Ok(RustlsConnector {
            connector: TlsConnector::from(Arc::new(config)),
            address: settings.address(),
            server_name,
            policy: settings.policy,
            strict,
        })
    }

    fn acceptor(&self, settings: &ServerSettings) -> Result<RustlsAcceptor> {
        let provider = provider(settings.ciphers.as_deref())?;
        let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(tls_config_error)?;

        let strict = if settings.request_cert {
            let roots = Arc::new(trust_store(settings.trust_anchors.as_deref())?);
            let verifier = WebPkiClientVerifier::builder_with_provider(roots, Arc::clone(&provider))
                .build()
                .map_err(|e| Error::invalid("ca", e.to_string()))?;
            Some(verifier)
        } else {
            None
        };

        let builder = match (&strict, settings.policy) {
            (None, _) => builder.with_no_client_auth(),
            (Some(strict), VerifyPolicy::Enforce) => {
                builder.with_client_cert_verifier(Arc::clone(strict))
            }
            (Some(strict), VerifyPolicy::Relax) => {
                builder.with_client_cert_verifier(Arc::new(RelaxedClientVerifier {
                    strict: Arc::clone(strict),
                }))
            }
        };
        let (chain, key) = parse_identity(&settings.identity)?;
        let config = builder
            .with_single_cert(chain, key)
            .map_err(tls_config_error)?;

        Ok(RustlsAcceptor {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            policy: settings.policy,
            strict,
        })
    }
}

/// Client side: TCP connect then TLS handshake.
pub struct RustlsConnector {
    connector: TlsConnector,
    address: String,
    server_name: ServerName<'static>,
    policy: VerifyPolicy,
    strict: Arc<WebPkiServerVerifier>,
}

impl RustlsConnector {
    fn authorized(&self, state: &CommonState) -> bool {
        if self.policy == VerifyPolicy::Enforce {
            return true;
        }
        match state.peer_certificates() {
            Some([end_entity, intermediates @ ..]) => self
                .strict
                .verify_server_cert(
                    end_entity,
                    intermediates,
                    &self.server_name,
                    &[],
                    UnixTime::now(),
                )
                .is_ok(),
            _ => false,
        }
    }
}

#[async_trait]
impl SecureConnector for RustlsConnector {
    type Stream = RustlsStream;

    async fn connect(&self) -> Result<RustlsStream, TransportError> {
        let tcp = TcpStream::connect(&self.address).await.map_err(|e| {
            let kind = match e.kind() {
                io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
                _ => TransportErrorKind::Connect,
            };
            TransportError::new(kind, format!("{}: {}", self.address, e))
        })?;
        let peer_addr = tcp.peer_addr().ok();
        let _ = tcp.set_nodelay(true);

        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| TransportError::from_handshake_io(&e))?;

        let (_, session) = tls.get_ref();
        let facts = session_facts(session, self.authorized(session));
        tracing::debug!(
            address = %self.address,
            protocol = ?facts.protocol,
            "Client handshake completed"
        );

        Ok(RustlsStream {
            inner: TlsStream::from(tls),
            facts,
            peer_addr,
        })
    }
}

/// Server side: TLS handshake on an accepted socket.
pub struct RustlsAcceptor {
    acceptor: TlsAcceptor,
    policy: VerifyPolicy,
    strict: Option<Arc<dyn ClientCertVerifier>>,
}

impl RustlsAcceptor {
    fn authorized(&self, state: &CommonState) -> bool {
        let Some(strict) = &self.strict else {
            return false;
        };
        match state.peer_certificates() {
            Some([end_entity, intermediates @ ..]) => {
                self.policy == VerifyPolicy::Enforce
                    || strict
                        .verify_client_cert(end_entity, intermediates, UnixTime::now())
                        .is_ok()
            }
            _ => false,
        }
    }
}

#[async_trait]
impl SecureAcceptor for RustlsAcceptor {
    type Stream = RustlsStream;

    async fn accept(&self, stream: TcpStream) -> Result<RustlsStream, TransportError> {
        let peer_addr = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);

        let tls = self
            .acceptor
            .accept(stream)
            .await
            .map_err(|e| TransportError::from_handshake_io(&e))?;

        let (_, session) = tls.get_ref();
        let facts = session_facts(session, self.authorized(session));

        Ok(RustlsStream {
            inner: TlsStream::from(tls),
            facts,
            peer_addr,
        })
    }
}

/// An established TLS stream with the session facts captured at handshake.
pub struct RustlsStream {
    inner: TlsStream<TcpStream>,
    facts: SessionFacts,
    peer_addr: Option<SocketAddr>,
}

impl SecureStream for RustlsStream {
    fn session_facts(&self) -> SessionFacts {
        self.facts.clone()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl AsyncRead for RustlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RustlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    /// Sends close_notify, then shuts the TCP write side.
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

fn session_facts(state: &CommonState, authorized: bool) -> SessionFacts {
    SessionFacts {
        protocol: state.protocol_version().map(protocol_name),
        cipher: state
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        authorized,
        peer_certificate: state
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|cert| cert.as_ref().to_vec()),
    }
}

fn protocol_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        other => format!("{:?}", other),
    }
}

/// The ring provider, optionally narrowed to the named cipher suites.
fn provider(ciphers: Option<&[String]>) -> Result<Arc<CryptoProvider>> {
    let mut provider = rustls::crypto::ring::default_provider();
    if let Some(names) = ciphers {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let suite = provider
                .cipher_suites
                .iter()
                .find(|suite| suite_matches(suite, name))
                .copied()
                .ok_or_else(|| Error::invalid("ciphers", format!("unknown cipher suite {name}")))?;
            selected.push(suite);
        }
        provider.cipher_suites = selected;
    }
    Ok(Arc::new(provider))
}

/// Accepts `TLS13_AES_128_GCM_SHA256`, `tls13-aes-128-gcm-sha256` or the
/// same name without its `TLS13_`/`TLS_` prefix.
fn suite_matches(suite: &SupportedCipherSuite, name: &str) -> bool {
    let wanted = name.trim().to_ascii_uppercase().replace('-', "_");
    let full = format!("{:?}", suite.suite());
    let short = full
        .strip_prefix("TLS13_")
        .or_else(|| full.strip_prefix("TLS_"))
        .unwrap_or(&full);
    wanted == full || wanted == short
}

fn trust_store(ca: Option<&[u8]>) -> Result<RootCertStore> {
    let Some(pem) = ca else {
        return Ok(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.into(),
        });
    };
    let mut store = RootCertStore::empty();
    for cert in parse_certs(pem, "ca")? {
        store
            .add(cert)
            .map_err(|e| Error::invalid("ca", e.to_string()))?;
    }
    Ok(store)
}

fn parse_identity(
    identity: &CredentialPair,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let chain = parse_certs(&identity.cert_chain, "cert")?;
    let key = rustls_pemfile::private_key(&mut identity.private_key.as_slice())
        .map_err(|e| Error::invalid("key", e.to_string()))?
        .ok_or_else(|| Error::invalid("key", "no private key found in PEM data"))?;
    Ok((chain, key))
}

fn parse_certs(pem: &[u8], field: &'static str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::invalid(field, e.to_string()))?;
    if certs.is_empty() {
        return Err(Error::invalid(field, "no certificates found in PEM data"));
    }
    Ok(certs)
}

fn tls_config_error(err: rustls::Error) -> Error {
    Error::invalid("tls", err.to_string())
}

/// Accepts any server chain; signatures are still checked.
#[derive(Debug)]
struct RelaxedServerVerifier {
    strict: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for RelaxedServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.strict.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.strict.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.strict.supported_verify_schemes()
    }
}

/// Requests a client certificate but accepts any chain, or none.
#[derive(Debug)]
struct RelaxedClientVerifier {
    strict: Arc<dyn ClientCertVerifier>,
}

impl ClientCertVerifier for RelaxedClientVerifier {
    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.strict.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.strict.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.strict.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.strict.supported_verify_schemes()
    }
}
