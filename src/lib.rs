//! Resilient multi-server RPC client.
//!
//! Keeps one connection per configured server, hands requests out round-robin
//! over the live ones, queues requests issued before the pool is usable and
//! reconnects failed members in the background.
//!
//! ```text
//!   Client::execute ──▶ gate ──▶ ConnectionSupervisor::select ──▶ ConnectionRing
//!                        │                                             │
//!                  pending queue                                 PoolConnection
//!                                                                      │
//!   ServerWorker (per server) ── connect / reconnect ──▶ Transport ────┘
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod protocol;
pub mod resilience;
pub mod transport;

pub use client::Client;
pub use config::schema::ClientConfig;
pub use config::ServerAddress;
pub use error::{ClientError, ClientResult};
pub use protocol::{Method, Request, Response};
pub use transport::{Connection, TcpTransport, Transport, TransportError};
