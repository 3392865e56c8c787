//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! ClientConfig.servers
//!     → supervisor.rs (one ServerWorker per address)
//!         → Transport::connect
//!         → member.rs (PoolConnection wraps the link)
//!         → ring.rs (registered for selection)
//!
//! Client dispatch:
//!     → ConnectionSupervisor::select (ring.get_next under the ring lock)
//!     → PoolConnection::send
//!     → on transport error: ConnectionSupervisor::report_failure
//!         → removed from ring, worker reconnects
//! ```
//!
//! # Design Decisions
//! - The ring is a plain data structure; the supervisor serializes access to it
//! - Each address is owned by exactly one worker task
//! - Readiness is decided by a single coordinator fed by worker events

use std::fmt;

use uuid::Uuid;

pub mod member;
pub mod ring;
pub mod supervisor;

pub use member::{MemberState, PoolConnection};
pub use ring::{ConnectionRing, NoAvailableConnection, RingMember};
pub use supervisor::{BringUpOutcome, ConnectionSupervisor, ReadinessPolicy};

/// Unique identifier of a pooled connection.
///
/// Assigned when a freshly established link is registered; a reconnect to the
/// same address yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }
}
