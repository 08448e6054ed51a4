//! Connection lifecycle state machine.
//!
//! # Responsibilities
//! - Drive one connection attempt from Idle to a terminal state
//! - Cache the peer identity at the Connecting → Active transition
//! - Translate transport activity into [`NotificationEvent`]s
//! - Enforce the inactivity deadline and the graceful-close path
//!
//! # Ownership
//! ```text
//! open()   caller task   Idle → Connecting → Active | Failed
//! driver   spawned task  owns the read half; every transport-driven
//!                        transition (PeerClosed, TimedOut, Closed, Failed)
//! close()  any task      Active → Closing, then waits for the driver;
//!                        during Connecting, aborts the handshake
//! send()   any task      writes through the shared write half while Active
//! ```
//! Only the open path (before the driver exists) and the driver emit events,
//! which is what keeps per-connection notification order intact. Dropping
//! the `open` future mid-handshake fails the lifecycle from its drop guard.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::events::{EventHub, EventKind, NotificationEvent};
use crate::identity::PeerIdentity;
use crate::net::connection::ConnectionId;
use crate::net::state::{LifecycleState, StateCell};
use crate::net::transport::{BoxedStream, SecureStream};
use crate::observability::logging::{Logger, TracingLogger};
use crate::observability::metrics::{self, Outcome, Role};
use crate::resilience::timeouts::{expire_at, IdleTimer};

const READ_CHUNK: usize = 16 * 1024;

/// Per-connection tuning shared by both roles.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub role: Role,
    /// Bounds the handshake, then closes an idle Active connection.
    pub inactivity_timeout: Option<Duration>,
    /// How long a graceful close waits for the peer to finish closing.
    pub close_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            role: Role::Client,
            inactivity_timeout: None,
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to one connection lifecycle. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    shared: Arc<Shared>,
}

struct Shared {
    id: ConnectionId,
    options: LifecycleOptions,
    state: StateCell,
    identity: OnceLock<PeerIdentity>,
    peer_addr: OnceLock<SocketAddr>,
    events: Arc<EventHub<NotificationEvent>>,
    writer: AsyncMutex<Option<WriteHalf<BoxedStream>>>,
    /// Outbound activity, re-arms the driver's idle timer.
    activity: Notify,
    /// Raised by `close()` while the handshake is still pending.
    abort: Notify,
    /// Write failures observed by `send`, handled by the driver.
    faults_tx: mpsc::UnboundedSender<TransportError>,
    faults_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportError>>>,
    logger: Arc<dyn Logger>,
}

enum Attempt<S> {
    Done(std::result::Result<S, TransportError>),
    Aborted,
    TimedOut,
}

/// Fails a lifecycle left in Connecting when `open` is dropped.
struct PendingHandshake<'a>(&'a Shared);

impl Drop for PendingHandshake<'_> {
    fn drop(&mut self) {
        self.0.abandon();
    }
}

enum CloseCause {
    Local,
    Peer,
    Timeout,
}

impl ConnectionLifecycle {
    /// Create an Idle lifecycle with its own event hub and a tracing logger.
    pub fn new(options: LifecycleOptions) -> Self {
        Self::with_parts(
            options,
            Arc::new(EventHub::new()),
            Arc::new(TracingLogger::default()),
        )
    }

    /// Create an Idle lifecycle emitting into `events` and logging to `logger`.
    pub fn with_parts(
        options: LifecycleOptions,
        events: Arc<EventHub<NotificationEvent>>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                id: ConnectionId::new(),
                options,
                state: StateCell::new(),
                identity: OnceLock::new(),
                peer_addr: OnceLock::new(),
                events,
                writer: AsyncMutex::new(None),
                activity: Notify::new(),
                abort: Notify::new(),
                faults_tx,
                faults_rx: Mutex::new(Some(faults_rx)),
                logger,
            }),
        }
    }

    /// Run `handshake` and drive Idle → Connecting → Active | Failed.
    ///
    /// Fails without side effects when the lifecycle is not Idle. The
    /// inactivity timeout, when configured, bounds the handshake. If this
    /// future is dropped before it resolves, the lifecycle moves to Failed.
    pub async fn open<S, F>(&self, handshake: F) -> Result<()>
    where
        S: SecureStream,
        F: Future<Output = std::result::Result<S, TransportError>>,
    {
        let shared = &self.shared;
        if !shared
            .state
            .transition_from(LifecycleState::Idle, LifecycleState::Connecting)
        {
            return Err(Error::invalid(
                "state",
                format!("connection is already {}", shared.state.get()),
            ));
        }
        shared
            .logger
            .debug("Opening connection", &[("connection", &shared.id)]);

        let _pending = PendingHandshake(shared.as_ref());

        let started = Instant::now();
        let attempt = async {
            tokio::select! {
                result = handshake => Attempt::Done(result),
                _ = shared.abort.notified() => Attempt::Aborted,
            }
        };
        let attempt = match shared.options.inactivity_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Attempt::TimedOut),
            None => attempt.await,
        };

        match attempt {
            Attempt::Done(Ok(stream)) => {
                shared.establish(Box::new(stream), started).await;
                Ok(())
            }
            Attempt::Done(Err(error)) => {
                shared.fail(error.clone()).await;
                Err(error.into())
            }
            Attempt::Aborted => {
                let error = TransportError::new(
                    TransportErrorKind::Connect,
                    "connection closed before the handshake completed",
                );
                shared.fail(error.clone()).await;
                Err(error.into())
            }
            Attempt::TimedOut => {
                shared
                    .logger
                    .warn("Handshake timed out", &[("connection", &shared.id)]);
                shared.events.emit(NotificationEvent::TimedOut);
                shared
                    .fail(TransportError::new(
                        TransportErrorKind::TimedOut,
                        "handshake did not complete before the inactivity timeout",
                    ))
                    .await;
                Err(Error::TimedOut)
            }
        }
    }

    /// Write `data` to the peer. Only accepted while Active.
    ///
    /// A write still pending when the connection leaves Active is abandoned
    /// with `NotActive`, releasing the write half to the close path.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let shared = &self.shared;
        if shared.state.get() != LifecycleState::Active {
            return Err(Error::NotActive);
        }

        let mut guard = shared.writer.lock().await;
        // Re-check under the lock: the close path takes the writer after
        // leaving Active, so no write can race the shutdown.
        let writer = match guard.as_mut() {
            Some(writer) if shared.state.get() == LifecycleState::Active => writer,
            _ => return Err(Error::NotActive),
        };

        let written = tokio::select! {
            written = write_frame(writer, data) => written,
            _ = shared.state.wait_for(|s| *s != LifecycleState::Active) => {
                return Err(Error::NotActive);
            }
        };
        match written {
            Ok(()) => {
                shared.activity.notify_one();
                Ok(())
            }
            Err(err) => {
                let error = TransportError::from_io(&err);
                let _ = shared.faults_tx.send(error.clone());
                Err(error.into())
            }
        }
    }

    /// Gracefully close and wait for a terminal state.
    ///
    /// Safe to call repeatedly and concurrently; calls after Closed or Failed
    /// return immediately. A close during Connecting aborts the handshake,
    /// which fails the attempt.
    pub async fn close(&self) {
        let shared = &self.shared;
        loop {
            match shared.state.get() {
                LifecycleState::Idle | LifecycleState::Closed | LifecycleState::Failed => return,
                LifecycleState::Connecting => {
                    shared.abort.notify_one();
                    shared
                        .state
                        .wait_for(|s| *s != LifecycleState::Connecting)
                        .await;
                }
                LifecycleState::Active => {
                    if shared
                        .state
                        .transition_from(LifecycleState::Active, LifecycleState::Closing)
                    {
                        shared
                            .logger
                            .debug("Closing connection", &[("connection", &shared.id)]);
                    }
                }
                LifecycleState::Closing => {
                    shared.state.wait_for(|s| s.is_terminal()).await;
                    return;
                }
            }
        }
    }

    /// Suspend until Closed or Failed.
    pub async fn wait_terminal(&self) -> LifecycleState {
        self.shared.state.wait_for(|s| s.is_terminal()).await
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Identity snapshot taken at the handshake. Absent before Active.
    pub fn peer_identity(&self) -> Option<PeerIdentity> {
        match self.state() {
            LifecycleState::Idle | LifecycleState::Connecting => None,
            _ => self.shared.identity.get().cloned(),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr.get().copied()
    }

    pub fn events(&self) -> &Arc<EventHub<NotificationEvent>> {
        &self.shared.events
    }

    /// Receive this connection's events of the given kinds (empty = all).
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<NotificationEvent> {
        self.shared.events.subscribe(kinds)
    }

    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, callback);
    }
}

impl std::fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    /// Connecting → Active: cache the identity, announce, start the driver.
    async fn establish(self: &Arc<Self>, stream: BoxedStream, started: Instant) {
        let identity = PeerIdentity::from_session(&stream.session_facts());
        if let Some(addr) = stream.peer_addr() {
            let _ = self.peer_addr.set(addr);
        }
        let (reader, writer) = tokio::io::split(stream);
        *self.writer.lock().await = Some(writer);
        let _ = self.identity.set(identity.clone());

        if !self
            .state
            .transition_from(LifecycleState::Connecting, LifecycleState::Active)
        {
            self.writer.lock().await.take();
            return;
        }

        metrics::record_opened(self.options.role, started.elapsed());
        self.logger.info(
            "TLS connection established",
            &[
                ("connection", &self.id),
                ("protocol", &identity.protocol),
                ("cipher", &identity.cipher),
                ("authorized", &identity.authorized),
            ],
        );
        self.events.emit(NotificationEvent::Connected(identity));

        let faults = self
            .faults_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);
        tokio::spawn(drive(Arc::clone(self), reader, faults));
    }

    fn deliver(&self, data: Bytes) {
        metrics::record_received(self.options.role, data.len());
        self.events.emit(NotificationEvent::DataReceived {
            data,
            connection: self.id,
        });
    }

    /// Any non-terminal state → Failed, emitting the error.
    async fn fail(&self, error: TransportError) {
        let Some(previous) = self.state.fail() else {
            return;
        };
        self.writer.lock().await.take();

        let was_active = matches!(previous, LifecycleState::Active | LifecycleState::Closing);
        metrics::record_terminal(self.options.role, Outcome::Failed, was_active);
        self.logger.error(
            "TLS connection error",
            &[("connection", &self.id), ("error", &error)],
        );
        self.events.emit(NotificationEvent::TransportError(error));
    }

    /// Connecting → Failed for a handshake whose `open` future was dropped.
    fn abandon(&self) {
        if !self
            .state
            .transition_from(LifecycleState::Connecting, LifecycleState::Failed)
        {
            return;
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        let error = TransportError::new(
            TransportErrorKind::Connect,
            "connection attempt dropped before the handshake completed",
        );
        metrics::record_terminal(self.options.role, Outcome::Failed, false);
        self.logger.warn(
            "Handshake abandoned",
            &[("connection", &self.id), ("error", &error)],
        );
        self.events.emit(NotificationEvent::TransportError(error));
    }

    /// Closing → Closed: flush and shut our side, drain the peer, release.
    ///
    /// The whole sequence shares one `close_timeout` deadline; once it passes
    /// the socket is released as is.
    async fn finish(&self, mut reader: ReadHalf<BoxedStream>, eof_seen: bool, mut buf: BytesMut) {
        let deadline = tokio::time::Instant::now() + self.options.close_timeout;

        let shutdown = async {
            match self.writer.lock().await.take() {
                Some(mut writer) => writer.shutdown().await,
                None => Ok(()),
            }
        };
        match tokio::time::timeout_at(deadline, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if eof_seen => {
                // The peer may already be gone; nothing left to flush to.
                self.logger.debug(
                    "Shutdown after peer close failed",
                    &[("connection", &self.id), ("error", &err)],
                );
            }
            Ok(Err(err)) => {
                self.fail(TransportError::from_io(&err)).await;
                return;
            }
            Err(_) => {
                self.logger.debug(
                    "Shutdown did not complete in time",
                    &[("connection", &self.id)],
                );
            }
        }

        if !eof_seen {
            let drain = async {
                loop {
                    buf.reserve(READ_CHUNK);
                    match reader.read_buf(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => self.deliver(buf.split().freeze()),
                    }
                }
            };
            if tokio::time::timeout_at(deadline, drain).await.is_err() {
                self.logger.debug(
                    "Peer did not finish closing in time",
                    &[("connection", &self.id)],
                );
            }
        }
        drop(reader);
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        if self
            .state
            .transition_from(LifecycleState::Closing, LifecycleState::Closed)
        {
            metrics::record_terminal(self.options.role, Outcome::Closed, true);
            self.logger
                .info("TLS connection closed", &[("connection", &self.id)]);
            self.events.emit(NotificationEvent::Closed);
        }
    }
}

/// Driver task: owns the read half for the whole Active window.
async fn drive(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BoxedStream>,
    mut faults: mpsc::UnboundedReceiver<TransportError>,
) {
    let mut state_rx = shared.state.subscribe();
    let mut idle = IdleTimer::new(shared.options.inactivity_timeout);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    let cause = loop {
        match *state_rx.borrow_and_update() {
            LifecycleState::Active => {}
            LifecycleState::Closing => break CloseCause::Local,
            _ => return,
        }
        buf.reserve(READ_CHUNK);

        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break CloseCause::Peer,
                Ok(_) => {
                    idle.reset();
                    shared.deliver(buf.split().freeze());
                }
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break CloseCause::Peer,
                Err(err) => {
                    shared.fail(TransportError::from_io(&err)).await;
                    return;
                }
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = expire_at(idle.deadline()) => break CloseCause::Timeout,
            _ = shared.activity.notified() => idle.reset(),
            Some(error) = faults.recv() => {
                shared.fail(error).await;
                return;
            }
        }
    };

    let eof_seen = match cause {
        CloseCause::Peer => {
            // Writes are rejected from here on: the state leaves Active.
            if shared
                .state
                .transition_from(LifecycleState::Active, LifecycleState::Closing)
            {
                shared
                    .logger
                    .debug("Peer ended the connection", &[("connection", &shared.id)]);
                shared.events.emit(NotificationEvent::PeerClosed);
            }
            true
        }
        CloseCause::Timeout => {
            shared
                .logger
                .warn("Connection timed out", &[("connection", &shared.id)]);
            shared.events.emit(NotificationEvent::TimedOut);
            shared
                .state
                .transition_from(LifecycleState::Active, LifecycleState::Closing);
            false
        }
        CloseCause::Local => false,
    };

    shared.finish(reader, eof_seen, buf).await;
}

async fn write_frame(writer: &mut WriteHalf<BoxedStream>, data: &[u8]) -> io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}
