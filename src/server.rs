//! Server role: a listener plus one lifecycle per accepted peer.
//!
//! # Listener states
//! ```text
//! Idle → Connecting   start() called, binding
//! Connecting → Active bound, accepting (emits Listening)
//! Active → Closing    stop() called
//! Closing → Closed    accept loop exited (emits Closed)
//! Connecting → Failed bind error (emits Error)
//! ```
//!
//! # Design Decisions
//! - Peer lifecycles are independent of each other and of the listener:
//!   `stop()` leaves Active peers running
//! - A peer is registered from accept until its lifecycle is terminal;
//!   the registration and the connection permit drop together
//! - Handshake rejections are reported as `ClientError` and never reach
//!   the accept loop

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::config::{CredentialLoader, FsCredentialLoader, ServerConfig, ServerSettings};
use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::events::{EventHub, EventKind, NotificationEvent, ServerEvent};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionId, ConnectionRegistry};
use crate::net::lifecycle::{ConnectionLifecycle, LifecycleOptions};
use crate::net::listener::{ConnectionPermit, Listener};
use crate::net::state::{LifecycleState, StateCell};
use crate::net::tls::RustlsTransport;
use crate::net::transport::{SecureAcceptor, SecureTransport};
use crate::observability::logging::{Logger, TracingLogger};
use crate::observability::metrics::Role;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TLS server accepting many concurrent peers.
pub struct TlsServer<T: SecureTransport = RustlsTransport> {
    config: ServerConfig,
    transport: T,
    loader: Arc<dyn CredentialLoader>,
    logger: Arc<dyn Logger>,
    events: Arc<EventHub<ServerEvent>>,
    connections: ConnectionRegistry,
    listener: Mutex<Option<ListenerHandle>>,
}

struct ListenerHandle {
    state: Arc<StateCell>,
    shutdown: Arc<Shutdown>,
    local_addr: Option<SocketAddr>,
}

/// Everything a peer task needs, cloned per accepted socket.
#[derive(Clone)]
struct PeerContext {
    options: LifecycleOptions,
    events: Arc<EventHub<ServerEvent>>,
    connections: ConnectionRegistry,
    logger: Arc<dyn Logger>,
}

impl TlsServer<RustlsTransport> {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_transport(config, RustlsTransport)
    }
}

impl<T: SecureTransport> TlsServer<T> {
    pub fn with_transport(config: ServerConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            loader: Arc::new(FsCredentialLoader),
            logger: Arc::new(TracingLogger::default()),
            events: Arc::new(EventHub::new()),
            connections: ConnectionRegistry::new(),
            listener: Mutex::new(None),
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

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Validate, bind and start accepting. Returns the bound address.
    ///
    /// Fails with `InvalidConfiguration` while a listener is already running.
    pub async fn start(&self) -> Result<SocketAddr> {
        self.ensure_stopped()?;
        let settings = ServerSettings::resolve(&self.config, self.loader.as_ref())?;
        let acceptor = Arc::new(self.transport.acceptor(&settings)?);

        let state = Arc::new(StateCell::new());
        let shutdown = Arc::new(Shutdown::new());
        {
            let mut current = self.lock_listener();
            if current.as_ref().is_some_and(|h| !h.state.get().is_terminal()) {
                return Err(already_running());
            }
            *current = Some(ListenerHandle {
                state: Arc::clone(&state),
                shutdown: Arc::clone(&shutdown),
                local_addr: None,
            });
        }
        state.transition_from(LifecycleState::Idle, LifecycleState::Connecting);

        let bound = match Listener::bind(&settings.bind_address, settings.max_connections).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(err) => Err(std::io::Error::new(err.io().kind(), err.to_string())),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                let error = TransportError::new(
                    TransportErrorKind::Connect,
                    format!("{}: {}", settings.bind_address, err),
                );
                state.fail();
                self.logger.error(
                    "TLS server failed to listen",
                    &[("address", &settings.bind_address), ("error", &error)],
                );
                self.events.emit(ServerEvent::Error(error.clone()));
                return Err(error.into());
            }
        };

        if let Some(handle) = self.lock_listener().as_mut() {
            handle.local_addr = Some(local_addr);
        }
        let stop = shutdown.subscribe();
        state.transition_from(LifecycleState::Connecting, LifecycleState::Active);

        self.logger.info(
            "TLS server listening",
            &[
                ("address", &local_addr),
                ("request_cert", &settings.request_cert),
                ("max_connections", &settings.max_connections),
            ],
        );
        self.events.emit(ServerEvent::Listening(local_addr));

        let ctx = PeerContext {
            options: LifecycleOptions {
                role: Role::Server,
                inactivity_timeout: settings.inactivity_timeout,
                close_timeout: settings.close_timeout,
            },
            events: Arc::clone(&self.events),
            connections: self.connections.clone(),
            logger: Arc::clone(&self.logger),
        };
        tokio::spawn(accept_loop(listener, acceptor, ctx, state, stop));

        Ok(local_addr)
    }

    /// Close the listener and wait until it is Closed.
    ///
    /// Already accepted peers keep running; close them through
    /// [`connections`](Self::connections) for a full drain.
    pub async fn stop(&self) {
        let Some(state) = self.lock_listener().as_ref().map(|h| Arc::clone(&h.state)) else {
            return;
        };
        loop {
            match state.get() {
                LifecycleState::Idle | LifecycleState::Closed | LifecycleState::Failed => return,
                LifecycleState::Connecting => {
                    state.wait_for(|s| *s != LifecycleState::Connecting).await;
                }
                LifecycleState::Active => {
                    if state.transition_from(LifecycleState::Active, LifecycleState::Closing) {
                        self.logger.debug("Stopping TLS server", &[]);
                        if let Some(handle) = self.lock_listener().as_ref() {
                            handle.shutdown.trigger();
                        }
                    }
                }
                LifecycleState::Closing => {
                    state.wait_for(|s| s.is_terminal()).await;
                    return;
                }
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener_state() == LifecycleState::Active
    }

    pub fn listener_state(&self) -> LifecycleState {
        self.lock_listener()
            .as_ref()
            .map(|h| h.state.get())
            .unwrap_or(LifecycleState::Idle)
    }

    /// Bound address while the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_listener()
            .as_ref()
            .filter(|h| !h.state.get().is_terminal())
            .and_then(|h| h.local_addr)
    }

    /// Peers currently owned by the server, ordered by ID.
    pub fn connections(&self) -> Vec<ConnectionLifecycle> {
        self.connections.snapshot()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionLifecycle> {
        self.connections.get(id)
    }

    /// Receive server events of the given kinds (empty = all).
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.events.subscribe(kinds)
    }

    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, callback);
    }

    fn ensure_stopped(&self) -> Result<()> {
        match self.lock_listener().as_ref() {
            Some(handle) if !handle.state.get().is_terminal() => Err(already_running()),
            _ => Ok(()),
        }
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<ListenerHandle>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn already_running() -> Error {
    Error::invalid("state", "server is already running")
}

async fn accept_loop<A: SecureAcceptor>(
    listener: Listener,
    acceptor: Arc<A>,
    ctx: PeerContext,
    state: Arc<StateCell>,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            // Also fires when the server (and its Shutdown) is dropped.
            _ = stop.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr, permit)) => {
                    let acceptor = Arc::clone(&acceptor);
                    tokio::spawn(serve_peer(stream, peer_addr, permit, acceptor, ctx.clone()));
                }
                Err(err) => {
                    let error = TransportError::from_io(err.io());
                    ctx.logger.warn("Accept failed", &[("error", &error)]);
                    ctx.events.emit(ServerEvent::Error(error));
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    state.transition_from(LifecycleState::Active, LifecycleState::Closing);
    state.transition_from(LifecycleState::Closing, LifecycleState::Closed);
    ctx.logger.info(
        "TLS server stopped",
        &[("open_connections", &ctx.connections.len())],
    );
    ctx.events.emit(ServerEvent::Closed);
}

async fn serve_peer<A: SecureAcceptor>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    permit: ConnectionPermit,
    acceptor: Arc<A>,
    ctx: PeerContext,
) {
    let hub = Arc::new(EventHub::new());
    let lifecycle = ConnectionLifecycle::with_parts(
        ctx.options.clone(),
        Arc::clone(&hub),
        Arc::clone(&ctx.logger),
    );
    let connection = lifecycle.id();

    let server_events = Arc::clone(&ctx.events);
    hub.on_any(move |event: &NotificationEvent| {
        server_events.emit(ServerEvent::Peer {
            connection,
            event: event.clone(),
        });
    });
    let registration = ctx.connections.register(lifecycle.clone());

    match lifecycle.open(acceptor.accept(stream)).await {
        Ok(()) => {
            lifecycle.wait_terminal().await;
        }
        Err(err) => {
            let error = match err {
                Error::Transport(error) => error,
                Error::TimedOut => {
                    TransportError::new(TransportErrorKind::TimedOut, "handshake timed out")
                }
                other => TransportError::new(TransportErrorKind::Handshake, other.to_string()),
            };
            ctx.logger.warn(
                "TLS handshake rejected",
                &[
                    ("connection", &connection),
                    ("peer_addr", &peer_addr),
                    ("error", &error),
                ],
            );
            ctx.events.emit(ServerEvent::ClientError { peer_addr, error });
        }
    }

    drop(registration);
    drop(permit);
}
