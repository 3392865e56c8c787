//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or programmatic ClientConfig
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to Client::new, shared via Arc with the supervisor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a client is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::BackoffKind;
pub use schema::ClientConfig;
pub use schema::ReconnectConfig;
pub use schema::ResponseConfig;
pub use schema::ServerAddress;
pub use schema::TlsConfig;
