//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or programmatic ClientConfig / ServerConfig
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → credentials.rs (CredentialLoader resolves cert/key/ca bytes)
//!     → ClientSettings / ServerSettings (validated, immutable)
//!     → handed to the SecureTransport
//! ```
//!
//! # Design Decisions
//! - One config shape per role, each with its own rule set
//! - Validation never touches the filesystem or the network
//! - Credential bytes are loaded before the lifecycle leaves Idle

pub mod credentials;
pub mod loader;
pub mod schema;
pub mod validation;

pub use credentials::{ClientSettings, CredentialLoader, CredentialPair, FsCredentialLoader, ServerSettings};
pub use loader::{load_config, ConfigError};
pub use schema::{AppConfig, ClientConfig, ObservabilityConfig, ServerConfig, VerifyPolicy};
pub use validation::ValidationError;
