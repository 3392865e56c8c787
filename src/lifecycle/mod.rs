//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Bring-up:
//!     Client::new → validate config → spawn one worker per member → coordinator
//!
//! Teardown (shutdown.rs):
//!     Client::close → trigger → workers stop retrying → ring drained → links half-closed
//! ```
//!
//! # Design Decisions
//! - Teardown is latched: workers started after the trigger exit at once
//! - Teardown never waits for in-flight exchanges

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownSignal};
