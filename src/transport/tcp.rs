//! TCP transport with pipelined, correlation-keyed exchanges.
//!
//! # Responsibilities
//! - Open TCP (optionally TLS) links to members
//! - Pipeline requests on a link; match responses by correlation id
//! - Detect link failure and report it through `Connection::closed`
//!
//! # Design Decisions
//! - One writer task and one reader task per link; callers never block each other
//! - In-flight exchanges live in a concurrent map keyed by correlation id
//! - Link failure fails every outstanding exchange at once
//! - Responses for unknown ids are dropped (late answers after a half-close)

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_rustls::TlsConnector;

use crate::config::{ClientConfig, ServerAddress};
use crate::protocol::{Request, Response};
use crate::transport::codec::{self, RequestFrame, ResponseFrame};
use crate::transport::{tls, Connection, Transport, TransportError, TransportResult};

type Exchange = oneshot::Sender<TransportResult<Response>>;

/// Transport that speaks length-prefixed JSON over TCP.
#[derive(Clone)]
pub struct TcpTransport {
    tls: Option<TlsSettings>,
    max_frame_bytes: usize,
}

#[derive(Clone)]
struct TlsSettings {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl TcpTransport {
    /// Build a transport from client configuration, loading TLS material if enabled.
    pub fn new(config: &ClientConfig) -> TransportResult<Self> {
        let tls = match &config.tls {
            Some(tls_config) => Some(TlsSettings {
                connector: tls::load_connector(tls_config)?,
                server_name: tls_config.server_name.clone(),
            }),
            None => None,
        };

        Ok(Self {
            tls,
            max_frame_bytes: config.transport.max_frame_bytes,
        })
    }

    /// Plaintext transport with default limits.
    pub fn plaintext() -> Self {
        Self {
            tls: None,
            max_frame_bytes: crate::config::schema::TransportConfig::default().max_frame_bytes,
        }
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("tls", &self.tls.is_some())
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, server: &ServerAddress) -> TransportResult<Arc<dyn Connection>> {
        let stream = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(|source| TransportError::Connect {
                server: server.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let peer = server.to_string();
        match &self.tls {
            None => Ok(Arc::new(FramedConnection::start(
                stream,
                peer,
                self.max_frame_bytes,
            ))),
            Some(settings) => {
                let name = tls::server_name(settings.server_name.as_deref(), &server.host)?;
                let stream = settings
                    .connector
                    .connect(name, stream)
                    .await
                    .map_err(|e| TransportError::Tls(format!("handshake with {} failed: {}", peer, e)))?;
                tracing::debug!(server = %peer, "TLS handshake complete");
                Ok(Arc::new(FramedConnection::start(
                    stream,
                    peer,
                    self.max_frame_bytes,
                )))
            }
        }
    }
}

/// State shared between a link's handle and its I/O tasks.
struct Shared {
    peer: String,
    writable: AtomicBool,
    exchanges: DashMap<u64, Exchange>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Mark the link dead and fail every outstanding exchange. Idempotent.
    fn fail(&self, reason: &str) {
        self.writable.store(false, Ordering::SeqCst);
        let ids: Vec<u64> = self.exchanges.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.exchanges.remove(&id) {
                let _ = tx.send(Err(TransportError::Closed));
            }
        }
        if !*self.closed_tx.borrow() {
            tracing::debug!(peer = %self.peer, reason, "Link closed");
            self.closed_tx.send_replace(true);
        }
    }
}

/// A pipelined link over any byte stream.
pub struct FramedConnection {
    shared: Arc<Shared>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    next_id: AtomicU64,
    max_frame_bytes: usize,
}

impl FramedConnection {
    /// Take ownership of `stream` and spawn its reader and writer tasks.
    pub fn start<S>(stream: S, peer: String, max_frame_bytes: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            peer,
            writable: AtomicBool::new(true),
            exchanges: DashMap::new(),
            closed_tx,
        });

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(read_half, shared.clone(), max_frame_bytes));
        tokio::spawn(write_loop(write_half, outbound_rx, shared.clone()));

        Self {
            shared,
            outbound: Mutex::new(Some(outbound_tx)),
            next_id: AtomicU64::new(1),
            max_frame_bytes,
        }
    }

    /// Number of exchanges waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.shared.exchanges.len()
    }

    fn outbound(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.outbound
            .lock()
            .expect("outbound sender mutex poisoned")
            .clone()
    }
}

impl fmt::Debug for FramedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedConnection")
            .field("peer", &self.shared.peer)
            .field("writable", &self.is_writable())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[async_trait]
impl Connection for FramedConnection {
    async fn send(&self, request: Request) -> TransportResult<Response> {
        let outbound = match self.outbound() {
            Some(tx) if self.is_writable() => tx,
            _ => return Err(TransportError::Closed),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = codec::encode(&RequestFrame { id, request }, self.max_frame_bytes)?;

        let (tx, rx) = oneshot::channel();
        self.shared.exchanges.insert(id, tx);

        if outbound.send(frame).is_err() {
            self.shared.exchanges.remove(&id);
            return Err(TransportError::Closed);
        }
        // The link may have died between the writable check and the insert.
        if !self.is_writable() {
            if let Some((_, tx)) = self.shared.exchanges.remove(&id) {
                let _ = tx.send(Err(TransportError::Closed));
            }
        }

        tracing::trace!(peer = %self.shared.peer, id, "Request sent");
        rx.await.unwrap_or(Err(TransportError::Closed))
    }

    fn is_writable(&self) -> bool {
        self.shared.writable.load(Ordering::SeqCst)
    }

    async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn close(&self) {
        self.shared.writable.store(false, Ordering::SeqCst);
        let sender = self
            .outbound
            .lock()
            .expect("outbound sender mutex poisoned")
            .take();
        if sender.is_some() {
            tracing::debug!(peer = %self.shared.peer, "Half-closing link");
        }
    }
}

async fn read_loop<S>(mut reader: ReadHalf<S>, shared: Arc<Shared>, max_frame_bytes: usize)
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let payload = match codec::read_frame(&mut reader, max_frame_bytes).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                shared.fail("end of stream");
                return;
            }
            Err(e) => {
                tracing::warn!(peer = %shared.peer, error = %e, "Link read failed");
                shared.fail("read error");
                return;
            }
        };

        match codec::decode::<ResponseFrame>(&payload) {
            Ok(frame) => match shared.exchanges.remove(&frame.id) {
                Some((_, tx)) => {
                    let _ = tx.send(Ok(frame.response));
                }
                None => {
                    tracing::trace!(peer = %shared.peer, id = frame.id, "Dropping response with no waiter");
                }
            },
            Err(e) => {
                tracing::warn!(peer = %shared.peer, error = %e, "Undecodable frame from member");
                shared.fail("protocol error");
                return;
            }
        }
    }
}

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
) where
    S: AsyncRead + AsyncWrite,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = codec::write_frame(&mut writer, &frame).await {
            tracing::warn!(peer = %shared.peer, error = %e, "Link write failed");
            shared.fail("write error");
            return;
        }
    }

    // Sender dropped: half-close and let the reader drain late responses.
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(peer = %shared.peer, error = %e, "Shutdown of write side failed");
    }
}
