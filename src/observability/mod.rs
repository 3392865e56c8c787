//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool and client produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (ring size, member liveness, connect failures)
//!
//! Consumers:
//!     → whatever subscriber / recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - The library only emits; installing a subscriber or exporter is the binary's job
//! - Metric updates are fire-and-forget and never fail a request

pub mod logging;
pub mod metrics;
