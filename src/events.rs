//! Notification contract and fan-out.
//!
//! # Ordering
//! ```text
//! per connection:  Connected → DataReceived* → PeerClosed? → Closed
//!                  (TimedOut may precede the close sequence)
//!                  TransportError is terminal, like Closed
//! across connections: no ordering promised
//! ```
//!
//! # Design Decisions
//! - Interest is registered per [`EventKind`] category, by channel or callback
//! - Emission happens on the single task that owns the transition, so the hub
//!   never reorders events
//! - Closed channels are pruned on the next emission

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::identity::PeerIdentity;
use crate::net::connection::ConnectionId;

/// Named event categories callers can register interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Data,
    /// Peer-initiated shutdown.
    End,
    Close,
    Error,
    Timeout,
    /// Server only.
    Listening,
    /// Server only: a peer failed its handshake.
    ClientError,
}

/// Event emitted by one connection lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Connected(PeerIdentity),
    DataReceived { data: Bytes, connection: ConnectionId },
    PeerClosed,
    Closed,
    TransportError(TransportError),
    TimedOut,
}

impl NotificationEvent {
    /// True for the events after which a connection emits nothing else.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationEvent::Closed | NotificationEvent::TransportError(_)
        )
    }
}

/// Event emitted by a server: listener lifecycle plus every peer's events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Listening(SocketAddr),
    Peer {
        connection: ConnectionId,
        event: NotificationEvent,
    },
    ClientError {
        peer_addr: SocketAddr,
        error: TransportError,
    },
    /// Listener-level failure (bind or accept).
    Error(TransportError),
    /// The listener closed. Peers are unaffected.
    Closed,
}

/// Anything that can be routed by category.
pub trait Event: Clone + Send + 'static {
    fn kind(&self) -> EventKind;
}

impl Event for NotificationEvent {
    fn kind(&self) -> EventKind {
        match self {
            NotificationEvent::Connected(_) => EventKind::Connect,
            NotificationEvent::DataReceived { .. } => EventKind::Data,
            NotificationEvent::PeerClosed => EventKind::End,
            NotificationEvent::Closed => EventKind::Close,
            NotificationEvent::TransportError(_) => EventKind::Error,
            NotificationEvent::TimedOut => EventKind::Timeout,
        }
    }
}

impl Event for ServerEvent {
    fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Listening(_) => EventKind::Listening,
            ServerEvent::Peer { event, .. } => event.kind(),
            ServerEvent::ClientError { .. } => EventKind::ClientError,
            ServerEvent::Error(_) => EventKind::Error,
            ServerEvent::Closed => EventKind::Close,
        }
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

enum Sink<E> {
    Channel(mpsc::UnboundedSender<E>),
    Callback(Callback<E>),
}

impl<E> Clone for Sink<E> {
    fn clone(&self) -> Self {
        match self {
            Sink::Channel(tx) => Sink::Channel(tx.clone()),
            Sink::Callback(f) => Sink::Callback(Arc::clone(f)),
        }
    }
}

struct Subscriber<E> {
    /// Empty means every category.
    kinds: Vec<EventKind>,
    sink: Sink<E>,
}

impl<E> Subscriber<E> {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    fn is_closed(&self) -> bool {
        matches!(&self.sink, Sink::Channel(tx) if tx.is_closed())
    }
}

/// Fan-out point for one event stream.
pub struct EventHub<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E: Event> EventHub<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Receive events of the given categories. An empty slice means all.
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(kinds.to_vec(), Sink::Channel(tx));
        rx
    }

    /// Invoke `callback` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.push(vec![kind], Sink::Callback(Arc::new(callback)));
    }

    /// Invoke `callback` for every event.
    pub fn on_any<F>(&self, callback: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.push(Vec::new(), Sink::Callback(Arc::new(callback)));
    }

    /// Deliver `event` to every interested subscriber.
    ///
    /// Sinks are snapshotted first so callbacks may register new interest
    /// without deadlocking.
    pub fn emit(&self, event: E) {
        let kind = event.kind();
        let sinks: Vec<Sink<E>> = {
            let mut subscribers = self.lock();
            subscribers.retain(|s| !s.is_closed());
            subscribers
                .iter()
                .filter(|s| s.wants(kind))
                .map(|s| s.sink.clone())
                .collect()
        };

        for sink in sinks {
            match sink {
                Sink::Channel(tx) => {
                    let _ = tx.send(event.clone());
                }
                Sink::Callback(f) => f(&event),
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn push(&self, kinds: Vec<EventKind>, sink: Sink<E>) {
        self.lock().push(Subscriber { kinds, sink });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber<E>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Event> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn filters_by_category() {
        let hub = EventHub::new();
        let mut closes = hub.subscribe(&[EventKind::Close]);
        let mut all = hub.subscribe(&[]);

        hub.emit(NotificationEvent::PeerClosed);
        hub.emit(NotificationEvent::Closed);

        assert_eq!(closes.try_recv().unwrap(), NotificationEvent::Closed);
        assert!(closes.try_recv().is_err());
        assert_eq!(all.try_recv().unwrap(), NotificationEvent::PeerClosed);
        assert_eq!(all.try_recv().unwrap(), NotificationEvent::Closed);
    }

    #[test]
    fn callbacks_fire_per_kind() {
        let hub = EventHub::new();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let counter = timeouts.clone();
        hub.on(EventKind::Timeout, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hub.emit(NotificationEvent::TimedOut);
        hub.emit(NotificationEvent::Closed);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let hub: EventHub<NotificationEvent> = EventHub::new();
        let rx = hub.subscribe(&[]);
        assert_eq!(hub.subscriber_count(), 1);
        drop(rx);
        hub.emit(NotificationEvent::Closed);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn callbacks_may_subscribe_during_emit() {
        let hub: Arc<EventHub<NotificationEvent>> = Arc::new(EventHub::new());
        let inner = Arc::clone(&hub);
        hub.on_any(move |_| {
            let _ = inner.subscribe(&[EventKind::Close]);
        });
        hub.emit(NotificationEvent::TimedOut);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn server_events_route_by_inner_kind() {
        let event = ServerEvent::Peer {
            connection: ConnectionId::new(),
            event: NotificationEvent::DataReceived {
                data: Bytes::from_static(b"ping"),
                connection: ConnectionId::new(),
            },
        };
        assert_eq!(event.kind(), EventKind::Data);
        assert_eq!(ServerEvent::Closed.kind(), EventKind::Close);
        assert!(NotificationEvent::Closed.is_terminal());
        assert!(!NotificationEvent::PeerClosed.is_terminal());
    }
}
