//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection lifecycle:
//!     → timeouts.rs (bound the handshake, close idle connections)
//! ```
//!
//! # Design Decisions
//! - A deadline, once configured, applies to every phase before Closing
//! - Timers sleep until a deadline; nothing polls

pub mod timeouts;
