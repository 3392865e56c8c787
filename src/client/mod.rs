//! Client facade.
//!
//! # Responsibilities
//! - Validate configuration and start pool bring-up
//! - Gate requests on readiness; queue early ones
//! - Dispatch through the ring and validate responses
//! - Tear the pool down on close
//!
//! # Data Flow
//! ```text
//! execute(request)
//!     → request check (verb + uri)
//!     → gate.rs
//!         Starting → queued, resolved by the drain
//!         Ready    → supervisor.select() → member.send()
//!                      link failure → supervisor.report_failure()
//!                      encode / size error → returned, member kept
//!                      status >= threshold → Application
//!                      body not JSON → MalformedResponse
//!         Failed / Closed → rejected
//! ```
//!
//! # Design Decisions
//! - Cloning a `Client` shares the same pool
//! - The drain selects members in queue order, then sends concurrently
//! - Requests are never retried internally

pub mod gate;

use std::sync::{Arc, Weak};

use tokio::sync::oneshot;

use crate::config::validation::validate_config;
use crate::config::{ClientConfig, ResponseConfig};
use crate::error::{ClientError, ClientResult};
use crate::pool::{BringUpOutcome, ConnectionSupervisor, PoolConnection, ReadinessPolicy};
use crate::protocol::{Method, Request, Response};
use crate::transport::Transport;

use self::gate::{Admission, Gate, Phase, PendingRequest};

/// Handle to a pool of connections to equivalent servers.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    response: ResponseConfig,
    configured: usize,
    supervisor: ConnectionSupervisor,
    gate: Gate,
}

impl Client {
    /// Validate `config` and start connecting to every server in the background.
    ///
    /// Must be called inside a tokio runtime. Use [`Client::wait_ready`] to
    /// observe the outcome of bring-up; requests issued earlier are queued.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> ClientResult<Self> {
        validate_config(&config)?;

        let policy = ReadinessPolicy::from_ready_with_one(config.ready_with_one);
        let (supervisor, ready_rx) = ConnectionSupervisor::connect_all(
            &config.servers,
            policy,
            transport,
            config.reconnect.clone(),
        );

        let inner = Arc::new(Inner {
            response: config.response,
            configured: config.servers.len(),
            supervisor,
            gate: Gate::new(),
        });
        tokio::spawn(await_bring_up(Arc::downgrade(&inner), ready_rx));

        Ok(Self { inner })
    }

    /// Resolve once bring-up has finished.
    ///
    /// Fails with `NoServersAvailable` if no server could be reached, or with
    /// `ClientClosed` if the client is closed before or after becoming ready.
    pub async fn wait_ready(&self) -> ClientResult<()> {
        let mut rx = self.inner.gate.subscribe();
        let phase = match rx.wait_for(|phase| *phase != Phase::Starting).await {
            Ok(phase) => *phase,
            Err(_) => Phase::Closed,
        };
        match phase {
            Phase::Ready => Ok(()),
            Phase::Failed => Err(ClientError::NoServersAvailable),
            Phase::Starting | Phase::Closed => Err(ClientError::ClientClosed),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.gate.phase() == Phase::Ready
    }

    pub fn configured_servers(&self) -> usize {
        self.inner.configured
    }

    /// Servers that currently hold a live connection.
    pub fn connected_servers(&self) -> usize {
        self.inner.supervisor.connected_servers()
    }

    /// Members currently eligible for dispatch.
    pub fn ring_len(&self) -> usize {
        self.inner.supervisor.ring_len()
    }

    /// Send `request` to the next available server.
    ///
    /// Before readiness the request waits in the pending queue and this call
    /// resolves once the queue is drained.
    pub async fn execute(&self, request: Request) -> ClientResult<Response> {
        check_request(&request)?;

        match self.inner.gate.admit(request) {
            Admission::Dispatch(request) => {
                let member = self.inner.supervisor.select()?;
                self.inner.send_on(&member, request).await
            }
            Admission::Queued(rx) => rx.await.unwrap_or(Err(ClientError::ClientClosed)),
            Admission::Rejected(err) => Err(err),
        }
    }

    pub async fn get(&self, request: impl Into<Request>) -> ClientResult<Response> {
        self.execute(request.into().method(Method::Get)).await
    }

    pub async fn put(&self, request: impl Into<Request>) -> ClientResult<Response> {
        self.execute(request.into().method(Method::Put)).await
    }

    pub async fn post(&self, request: impl Into<Request>) -> ClientResult<Response> {
        self.execute(request.into().method(Method::Post)).await
    }

    pub async fn delete(&self, request: impl Into<Request>) -> ClientResult<Response> {
        self.execute(request.into().method(Method::Delete)).await
    }

    pub async fn head(&self, request: impl Into<Request>) -> ClientResult<Response> {
        self.execute(request.into().method(Method::Head)).await
    }

    pub async fn options(&self, request: impl Into<Request>) -> ClientResult<Response> {
        self.execute(request.into().method(Method::Options)).await
    }

    /// Stop reconnecting and half-close every pooled connection.
    ///
    /// Queued requests fail with `ClientClosed`, as does every later call.
    /// Calling `close` again is a no-op.
    pub async fn close(&self) {
        let (first, pending) = self.inner.gate.close();
        if first {
            tracing::info!(pending = pending.len(), "Closing client");
        }
        for entry in pending {
            entry.complete(Err(ClientError::ClientClosed));
        }
        self.inner.supervisor.shutdown().await;
    }
}

impl Inner {
    async fn send_on(&self, member: &PoolConnection, request: Request) -> ClientResult<Response> {
        tracing::trace!(server = %member.server(), uri = %request.uri, "Dispatching request");
        match member.send(request).await {
            Ok(response) => validate_response(&self.response, response),
            Err(e) if e.is_link_failure() => {
                tracing::warn!(server = %member.server(), error = %e, "Request failed at transport level");
                self.supervisor.report_failure(member);
                Err(ClientError::Transport(e))
            }
            Err(e) => {
                tracing::debug!(server = %member.server(), error = %e, "Request rejected before sending");
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Dispatch the pending queue: select in FIFO order, send concurrently.
    fn drain(self: &Arc<Self>, pending: Vec<PendingRequest>) {
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Draining pending requests");
        }
        for entry in pending {
            match self.supervisor.select() {
                Ok(member) => {
                    let inner = self.clone();
                    tokio::spawn(async move {
                        let PendingRequest { request, reply } = entry;
                        let result = inner.send_on(&member, request).await;
                        let _ = reply.send(result);
                    });
                }
                Err(e) => entry.complete(Err(e.into())),
            }
        }
    }
}

async fn await_bring_up(inner: Weak<Inner>, ready_rx: oneshot::Receiver<BringUpOutcome>) {
    // Dropped unresolved when the pool closes first.
    let Ok(outcome) = ready_rx.await else { return };
    let Some(inner) = inner.upgrade() else { return };

    match outcome {
        BringUpOutcome::Ready { .. } => {
            if let Some(pending) = inner.gate.open() {
                inner.drain(pending);
            }
        }
        BringUpOutcome::NoServersAvailable => {
            if let Some(pending) = inner.gate.fail() {
                for entry in pending {
                    entry.complete(Err(ClientError::NoServersAvailable));
                }
            }
            // A failed pool never becomes ready; stop the background retries.
            inner.supervisor.shutdown().await;
        }
    }
}

fn check_request(request: &Request) -> ClientResult<()> {
    if request.method.is_none() {
        return Err(ClientError::InvalidRequest("no method set".into()));
    }
    if request.uri.trim().is_empty() {
        return Err(ClientError::InvalidRequest("empty uri".into()));
    }
    Ok(())
}

fn validate_response(config: &ResponseConfig, response: Response) -> ClientResult<Response> {
    if response.status >= config.error_status_threshold {
        return Err(ClientError::Application {
            status: response.status,
            body: response.body,
        });
    }
    if config.decode_body {
        if let Err(source) = serde_json::from_str::<serde_json::Value>(&response.body) {
            return Err(ClientError::MalformedResponse {
                status: response.status,
                body: response.body,
                source,
            });
        }
    }
    Ok(response)
}
