//! A pooled connection and per-address state.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::config::ServerAddress;
use crate::pool::ring::RingMember;
use crate::pool::ConnectionId;
use crate::protocol::{Request, Response};
use crate::transport::{Connection, TransportResult};

/// Lifecycle of one configured address, as seen by its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// A connect attempt is in progress.
    Connecting,
    /// A link is up and registered in the ring.
    Connected,
    /// The last attempt failed or the link dropped; waiting to retry.
    Failed,
    /// Bring-up attempts ran out; the worker keeps retrying in the background.
    Exhausted,
    /// The pool was closed.
    Stopped,
}

/// An established link registered (or about to be) in the ring.
pub struct PoolConnection {
    id: ConnectionId,
    server: ServerAddress,
    link: Arc<dyn Connection>,
    evicted: Notify,
}

impl PoolConnection {
    pub fn new(server: ServerAddress, link: Arc<dyn Connection>) -> Self {
        Self {
            id: ConnectionId::new(),
            server,
            link,
            evicted: Notify::new(),
        }
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }

    pub async fn send(&self, request: Request) -> TransportResult<Response> {
        self.link.send(request).await
    }

    /// Ask the owning worker to drop this link and reconnect.
    ///
    /// The request is latched, so it is seen even if the worker is not yet waiting.
    pub fn evict(&self) {
        self.evicted.notify_one();
    }

    /// Resolve once the link fails or the member is evicted.
    pub async fn lost(&self) -> &'static str {
        tokio::select! {
            _ = self.link.closed() => "link closed",
            _ = self.evicted.notified() => "evicted",
        }
    }

    /// Half-close the underlying link.
    pub fn close(&self) {
        self.link.close();
    }
}

impl RingMember for PoolConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_writable(&self) -> bool {
        self.link.is_writable()
    }
}

impl fmt::Debug for PoolConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("id", &self.id)
            .field("server", &self.server.to_string())
            .field("writable", &self.link.is_writable())
            .finish()
    }
}
