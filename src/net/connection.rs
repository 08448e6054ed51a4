//! Connection identity and server-side ownership tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs (the handle carried by data events)
//! - Track the lifecycles a server currently owns
//! - Drop a lifecycle from the registry once it reaches a terminal state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::net::lifecycle::ConnectionLifecycle;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycles owned by a server, keyed by connection ID.
///
/// Each entry has a single writer: it is inserted by the accept path and
/// removed when the [`Registration`] held by that connection's task drops.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<ConnectionId, ConnectionLifecycle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a lifecycle. The entry lives as long as the returned guard.
    pub fn register(&self, lifecycle: ConnectionLifecycle) -> Registration {
        let id = lifecycle.id();
        self.entries.insert(id, lifecycle);
        Registration {
            entries: Arc::clone(&self.entries),
            id,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionLifecycle> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every owned lifecycle, ordered by ID.
    pub fn snapshot(&self) -> Vec<ConnectionLifecycle> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(ConnectionLifecycle::id);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Guard that keeps a lifecycle registered.
/// Removes the entry when dropped.
#[derive(Debug)]
pub struct Registration {
    entries: Arc<DashMap<ConnectionId, ConnectionLifecycle>>,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.entries.remove(&self.id);
        tracing::trace!(connection_id = %self.id, "Connection deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::lifecycle::LifecycleOptions;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn registration_guard_removes_entry() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        let first = ConnectionLifecycle::new(LifecycleOptions::default());
        let second = ConnectionLifecycle::new(LifecycleOptions::default());
        let guard1 = registry.register(first.clone());
        let guard2 = registry.register(second.clone());
        assert_eq!(registry.len(), 2);
        assert!(registry.get(first.id()).is_some());

        drop(guard1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(first.id()).is_none());
        assert_eq!(registry.snapshot()[0].id(), guard2.id());

        drop(guard2);
        assert!(registry.is_empty());
    }
}
