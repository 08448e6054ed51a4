//! Inactivity deadline enforcement.
//!
//! # Responsibilities
//! - Track the inactivity deadline of one connection
//! - Re-arm on every inbound or outbound data unit
//!
//! # Design Decisions
//! - Uses Tokio's timer facilities; nothing polls
//! - An unset limit never fires
//! - Firing only signals; the caller decides on the graceful-close path

use std::time::Duration;

use tokio::time::Instant;

/// Re-armable inactivity deadline.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimer {
    limit: Option<Duration>,
    deadline: Option<Instant>,
}

impl IdleTimer {
    /// Arm a timer firing `limit` from now. `None` disables it.
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            limit,
            deadline: limit.map(|limit| Instant::now() + limit),
        }
    }

    /// Push the deadline `limit` into the future.
    pub fn reset(&mut self) {
        if let Some(limit) = self.limit {
            self.deadline = Some(Instant::now() + limit);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }
}

/// Resolve at `deadline`, or never when there is none.
pub async fn expire_at(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
