//! Client role: one outbound secured connection at a time.
//!
//! ```text
//! connect()     validate → load credentials → build connector → open lifecycle
//! write()       ConnectionLifecycle::send
//! disconnect()  ConnectionLifecycle::close, resolves once terminal
//! ```
//!
//! Subscribers registered on the client keep receiving events across
//! reconnects: every lifecycle the client opens emits into the same hub.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::config::{ClientConfig, ClientSettings, CredentialLoader, FsCredentialLoader};
use crate::error::{Error, Result};
use crate::events::{EventHub, EventKind, NotificationEvent};
use crate::identity::PeerIdentity;
use crate::net::lifecycle::{ConnectionLifecycle, LifecycleOptions};
use crate::net::state::LifecycleState;
use crate::net::tls::RustlsTransport;
use crate::net::transport::{SecureConnector, SecureTransport};
use crate::observability::logging::{Logger, TracingLogger};
use crate::observability::metrics::Role;

/// TLS client driving a single connection lifecycle.
///
/// Every connection the client opens emits into one hub, so a subscriber
/// sees `Closed` from one connection followed by `Connected` from the next.
/// Only `DataReceived` carries a [`ConnectionId`](crate::ConnectionId); to
/// attribute other events, compare against [`lifecycle`](Self::lifecycle)
/// after each `connect()`.
pub struct TlsClient<T: SecureTransport = RustlsTransport> {
    config: ClientConfig,
    transport: T,
    loader: Arc<dyn CredentialLoader>,
    logger: Arc<dyn Logger>,
    events: Arc<EventHub<NotificationEvent>>,
    lifecycle: Mutex<Option<ConnectionLifecycle>>,
}

impl TlsClient<RustlsTransport> {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, RustlsTransport)
    }
}

impl<T: SecureTransport> TlsClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            loader: Arc::new(FsCredentialLoader),
            logger: Arc::new(TracingLogger::default()),
            events: Arc::new(EventHub::new()),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_credential_loader(mut self, loader: Arc<dyn CredentialLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Establish the connection, returning the peer identity once Active.
    ///
    /// Configuration and credentials are checked before any socket is
    /// opened. Fails while a previous connection is still open.
    pub async fn connect(&self) -> Result<PeerIdentity> {
        let settings = ClientSettings::resolve(&self.config, self.loader.as_ref())?;
        let connector = self.transport.connector(&settings)?;

        let lifecycle = {
            let mut current = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = current.as_ref() {
                let state = existing.state();
                if !state.is_terminal() {
                    return Err(Error::invalid("state", format!("client is already {state}")));
                }
            }
            let lifecycle = ConnectionLifecycle::with_parts(
                LifecycleOptions {
                    role: Role::Client,
                    inactivity_timeout: settings.inactivity_timeout,
                    close_timeout: settings.close_timeout,
                },
                Arc::clone(&self.events),
                Arc::clone(&self.logger),
            );
            *current = Some(lifecycle.clone());
            lifecycle
        };

        let address = settings.address();
        self.logger.info(
            "Connecting to TLS server",
            &[
                ("connection", &lifecycle.id()),
                ("address", &address),
                ("servername", &settings.server_name),
            ],
        );

        lifecycle.open(connector.connect()).await?;
        lifecycle.peer_identity().ok_or(Error::NotActive)
    }

    /// Send `data` to the server. Fails with `NotActive` unless connected.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        match self.current() {
            Some(lifecycle) => lifecycle.send(data.as_ref()).await,
            None => Err(Error::NotActive),
        }
    }

    /// Gracefully close the connection and wait until it is terminal.
    pub async fn disconnect(&self) {
        if let Some(lifecycle) = self.current() {
            lifecycle.close().await;
        }
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some_and(|l| l.is_active())
    }

    pub fn state(&self) -> LifecycleState {
        self.current()
            .map(|l| l.state())
            .unwrap_or(LifecycleState::Idle)
    }

    /// Peer identity of the current connection while it is Active.
    pub fn connection_info(&self) -> Option<PeerIdentity> {
        self.current()
            .filter(|l| l.is_active())
            .and_then(|l| l.peer_identity())
    }

    /// The lifecycle of the most recent connect attempt.
    pub fn lifecycle(&self) -> Option<ConnectionLifecycle> {
        self.current()
    }

    /// Receive events of the given kinds (empty = all).
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<NotificationEvent> {
        self.events.subscribe(kinds)
    }

    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, callback);
    }

    fn current(&self) -> Option<ConnectionLifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
