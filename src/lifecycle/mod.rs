//! Process lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve wait_for_shutdown_signal()
//!
//! Shutdown (shutdown.rs):
//!     trigger() → accept loops stop → listener reaches Closed
//! ```
//!
//! # Design Decisions
//! - Stopping a listener never closes the connections it already accepted;
//!   the binary closes them explicitly after the listener is down

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
