//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Member connect attempt fails, or a live member drops:
//!     → backoff.rs (delay before the next attempt)
//!     → worker sleeps, then reconnects
//! ```
//!
//! # Design Decisions
//! - Constant delay by default; exponential with jitter on request
//! - No retry of individual requests: failures surface to the caller

pub mod backoff;
