//! Lifecycle states and the cell that owns them.
//!
//! # State Transitions
//! ```text
//! Idle → Connecting:       explicit open
//! Connecting → Active:     handshake completed
//! Active → Closing:        explicit close, peer shutdown, inactivity timeout
//! Closing → Closed:        socket fully closed
//! any non-terminal → Failed: unrecoverable transport error
//! ```
//!
//! Closed and Failed are terminal. Observers wait on a `watch` channel, so
//! nothing ever polls the state.

use std::fmt;

use tokio::sync::watch;

/// State of one connection attempt (or of a server's listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Closed | LifecycleState::Failed)
    }

    /// Whether the state machine permits `self → next`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Idle, Connecting) | (Connecting, Active) | (Active, Closing) | (Closing, Closed) => {
                true
            }
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Active => "active",
            LifecycleState::Closing => "closing",
            LifecycleState::Closed => "closed",
            LifecycleState::Failed => "failed",
        })
    }
}

/// Single owner of a [`LifecycleState`].
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<LifecycleState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move `from → to` atomically. Returns false, changing nothing, when the
    /// current state is not `from` or the edge is not allowed.
    pub fn transition_from(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == from && from.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Move to Failed from any non-terminal state. Returns the previous state.
    pub fn fail(&self) -> Option<LifecycleState> {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(LifecycleState::Failed) {
                previous = Some(*state);
                *state = LifecycleState::Failed;
                true
            } else {
                false
            }
        });
        previous
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Suspend until `predicate` holds, returning the matching state.
    pub async fn wait_for(&self, predicate: impl FnMut(&LifecycleState) -> bool) -> LifecycleState {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let matched = rx.wait_for(predicate).await.map(|state| *state);
        matched.unwrap_or_else(|_| self.get())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn transition_table() {
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Active));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Idle.can_transition_to(Failed));
        assert!(Closing.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Active));
        assert!(!Active.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Closed));
        assert!(!Active.can_transition_to(Connecting));
    }

    #[test]
    fn transition_from_requires_current_state() {
        let cell = StateCell::new();
        assert!(!cell.transition_from(Connecting, Active));
        assert!(cell.transition_from(Idle, Connecting));
        assert!(!cell.transition_from(Idle, Connecting));
        assert_eq!(cell.get(), Connecting);
    }

    #[test]
    fn failed_is_terminal() {
        let cell = StateCell::new();
        assert_eq!(cell.fail(), Some(Idle));
        assert_eq!(cell.fail(), None);
        assert!(!cell.transition_from(Failed, Closing));
        assert!(cell.get().is_terminal());
    }

    #[tokio::test]
    async fn wait_for_observes_later_transitions() {
        let cell = std::sync::Arc::new(StateCell::new());
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait_for(|s| s.is_terminal()).await })
        };
        assert!(cell.transition_from(Idle, Connecting));
        assert!(cell.transition_from(Connecting, Active));
        assert!(cell.transition_from(Active, Closing));
        assert!(cell.transition_from(Closing, Closed));
        assert_eq!(waiter.await.unwrap(), Closed);
    }
}
