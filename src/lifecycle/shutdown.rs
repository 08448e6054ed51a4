//! Shutdown coordination for accept loops.

use tokio::sync::broadcast;

/// Coordinator for stopping long-running tasks.
///
/// Subscribe before spawning the task: a trigger only reaches receivers that
/// already exist.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Returns false when nothing was listening.
    pub fn trigger(&self) -> bool {
        self.tx.send(()).is_ok()
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_existing_subscribers() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.trigger());

        let mut rx = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 1);
        assert!(shutdown.trigger());
        assert!(rx.recv().await.is_ok());
    }
}
