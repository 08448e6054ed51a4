//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle transitions and role operations produce:
//!     → logging.rs (Logger records, forwarded to tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{LogLevel, Logger, TracingLogger};
