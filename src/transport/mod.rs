//! Transport capability consumed by the pool.
//!
//! # Data Flow
//! ```text
//! ServerWorker
//!     → Transport::connect(address)        (tcp.rs, optional tls.rs)
//!     → Connection registered in the ring
//! Client::execute
//!     → Connection::send(request)          (codec.rs framing, correlation ids)
//!     → Response or TransportError
//! ```
//!
//! # Design Decisions
//! - Object safe traits so the pool can hold `Arc<dyn Connection>` and tests can
//!   plug in-memory transports
//! - A link reports its own death through `closed()`; the pool never polls
//! - `close()` is a half-close: no more writes, late responses still drain

pub mod codec;
pub mod tcp;
pub mod tls;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ServerAddress;
use crate::protocol::{Request, Response};

pub use tcp::TcpTransport;

/// Errors raised while establishing or using a link to a member.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The member could not be reached.
    #[error("failed to connect to {server}: {source}")]
    Connect {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to an established link failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link is closed or broke while the exchange was in flight.
    #[error("connection closed")]
    Closed,

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A frame exceeded the configured size limit.
    #[error("frame of {0} bytes exceeds the configured maximum")]
    FrameTooLarge(usize),
}

impl TransportError {
    /// Whether the error means the link itself is unusable.
    ///
    /// Encoding and size errors are raised for one request before anything is
    /// written; the link stays healthy. Failures found while reading surface
    /// to callers as `Closed`.
    pub fn is_link_failure(&self) -> bool {
        !matches!(self, TransportError::Codec(_) | TransportError::FrameTooLarge(_))
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// An established link to one member.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Send `request` and wait for its response.
    async fn send(&self, request: Request) -> TransportResult<Response>;

    /// Whether the link can currently carry new requests.
    fn is_writable(&self) -> bool;

    /// Resolve once the link has reported an error or end of stream.
    async fn closed(&self);

    /// Stop sending on this link. Responses already in flight may still arrive.
    fn close(&self);
}

/// Factory for links to members.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn connect(&self, server: &ServerAddress) -> TransportResult<Arc<dyn Connection>>;
}
