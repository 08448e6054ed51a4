//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Client: TlsClient::connect
//!     → tls.rs (TCP connect + handshake)
//!     → lifecycle.rs (state machine, driver task, notifications)
//!
//! Server: TlsServer::start
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (server handshake)
//!     → lifecycle.rs, tracked by connection.rs until terminal
//!
//! Connection States:
//!     Idle → Connecting → Active → Closing → Closed   (or → Failed)
//! ```
//!
//! # Design Decisions
//! - The handshake sits behind the `transport` traits so the lifecycle can be
//!   driven by any secure stream
//! - One driver task per connection is the only transport-driven emitter
//! - Bounded accept prevents resource exhaustion

pub mod connection;
pub mod lifecycle;
pub mod listener;
pub mod state;
pub mod tls;
pub mod transport;
