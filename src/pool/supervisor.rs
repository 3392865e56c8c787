//! Connection supervision: bring-up, failure isolation, reconnect.
//!
//! # Responsibilities
//! - Own one worker task per configured address
//! - Register healthy links in the ring; deregister failed ones
//! - Decide pool readiness exactly once
//! - Cancel all workers on close
//!
//! # Data Flow
//! ```text
//! ServerWorker (per address)
//!     Connecting ──ok──▶ Connected ──link lost / evicted──▶ Failed ──delay──▶ Connecting
//!         │                                                   ▲
//!         └──────────────────────err──────────────────────────┘
//!
//! every transition → WorkerEvent → coordinator → BringUpOutcome (once)
//! ```
//!
//! # Design Decisions
//! - Workers never touch readiness state; the coordinator is its only owner
//! - A link is in the ring before its `Connected` event is sent, so a ready
//!   pool always has at least one member at the moment of the decision
//! - Attempt limits apply to bring-up under the all-required policy only; they
//!   settle the readiness decision but never stop a worker from retrying

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{ReconnectConfig, ServerAddress};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::observability::metrics;
use crate::pool::member::{MemberState, PoolConnection};
use crate::pool::ring::{ConnectionRing, NoAvailableConnection, RingMember};
use crate::pool::ConnectionId;
use crate::resilience::backoff::reconnect_delay;
use crate::transport::Transport;

pub type SharedRing = Arc<Mutex<ConnectionRing<PoolConnection>>>;

/// When the pool counts as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Every address must connect (or exhaust its attempts).
    AllRequired,
    /// The first successful connection is enough.
    AnyOne,
}

impl ReadinessPolicy {
    pub fn from_ready_with_one(ready_with_one: bool) -> Self {
        if ready_with_one {
            Self::AnyOne
        } else {
            Self::AllRequired
        }
    }
}

/// Result of pool bring-up, reported once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpOutcome {
    Ready { connected: usize },
    NoServersAvailable,
}

#[derive(Debug)]
enum WorkerEvent {
    Connected { server: String, id: ConnectionId },
    ConnectFailed { server: String, attempt: u32 },
    Disconnected { server: String, id: ConnectionId, reason: &'static str },
    Exhausted { server: String },
}

/// Owner of every member worker and of the shared ring.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    ring: SharedRing,
    states: Arc<DashMap<String, MemberState>>,
    shutdown: Arc<Shutdown>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Start a worker for each address and a coordinator for readiness.
    ///
    /// Must be called inside a tokio runtime. The returned receiver yields the
    /// bring-up outcome; it is dropped unresolved if the pool closes first.
    pub fn connect_all(
        servers: &[ServerAddress],
        policy: ReadinessPolicy,
        transport: Arc<dyn Transport>,
        reconnect: ReconnectConfig,
    ) -> (Self, oneshot::Receiver<BringUpOutcome>) {
        let ring: SharedRing = Arc::new(Mutex::new(ConnectionRing::new()));
        let states = Arc::new(DashMap::new());
        let shutdown = Arc::new(Shutdown::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let attempt_limit = match policy {
            ReadinessPolicy::AllRequired => reconnect.max_connect_attempts,
            ReadinessPolicy::AnyOne => None,
        };

        tracing::info!(
            servers = servers.len(),
            policy = ?policy,
            "Bringing up connection pool"
        );

        let mut tasks = Vec::with_capacity(servers.len() + 1);
        for server in servers {
            states.insert(server.to_string(), MemberState::Connecting);
            let worker = ServerWorker {
                server: server.clone(),
                transport: transport.clone(),
                ring: ring.clone(),
                states: states.clone(),
                events: events_tx.clone(),
                reconnect: reconnect.clone(),
                attempt_limit,
                shutdown: shutdown.subscribe(),
            };
            tasks.push(tokio::spawn(worker.run()));
        }
        drop(events_tx);

        let coordinator = Coordinator {
            policy,
            total: servers.len(),
            connected: HashSet::new(),
            exhausted: HashSet::new(),
            ring: ring.clone(),
            ready_tx: Some(ready_tx),
        };
        tasks.push(tokio::spawn(coordinator.run(events_rx)));

        let supervisor = Self {
            ring,
            states,
            shutdown,
            tasks: Mutex::new(tasks),
        };
        (supervisor, ready_rx)
    }

    /// Pick the next writable member.
    pub fn select(&self) -> Result<Arc<PoolConnection>, NoAvailableConnection> {
        self.ring.lock().expect("ring mutex poisoned").get_next()
    }

    /// Take `member` out of rotation and have its worker reconnect.
    pub fn report_failure(&self, member: &PoolConnection) {
        let removed = self
            .ring
            .lock()
            .expect("ring mutex poisoned")
            .remove(&member.id())
            .is_some();
        if removed {
            tracing::warn!(server = %member.server(), id = %member.id(), "Evicting member after transport failure");
        }
        member.evict();
    }

    pub fn ring(&self) -> &SharedRing {
        &self.ring
    }

    pub fn ring_len(&self) -> usize {
        self.ring.lock().expect("ring mutex poisoned").len()
    }

    /// Number of addresses whose worker currently holds a live link.
    pub fn connected_servers(&self) -> usize {
        self.states
            .iter()
            .filter(|entry| *entry.value() == MemberState::Connected)
            .count()
    }

    pub fn member_state(&self, server: &ServerAddress) -> Option<MemberState> {
        self.states.get(&server.to_string()).map(|s| *s)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Stop every worker and half-close every member still in the ring.
    ///
    /// Idempotent. Returns once all worker tasks have exited.
    pub async fn shutdown(&self) {
        if !self.shutdown.is_triggered() {
            tracing::info!("Closing connection pool");
        }
        self.shutdown.trigger();

        let members = self.ring.lock().expect("ring mutex poisoned").drain();
        for member in &members {
            member.close();
        }
        metrics::record_ring_size(0);

        let tasks = std::mem::take(&mut *self.tasks.lock().expect("task list mutex poisoned"));
        for result in join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Pool task ended abnormally");
            }
        }
    }
}

/// Single owner of the readiness decision.
struct Coordinator {
    policy: ReadinessPolicy,
    total: usize,
    connected: HashSet<String>,
    exhausted: HashSet<String>,
    ring: SharedRing,
    ready_tx: Option<oneshot::Sender<BringUpOutcome>>,
}

impl Coordinator {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
            let ring_len = self.ring.lock().expect("ring mutex poisoned").len();
            metrics::record_ring_size(ring_len);

            if let Some(outcome) = self.decide() {
                if let Some(tx) = self.ready_tx.take() {
                    match outcome {
                        BringUpOutcome::Ready { connected } => {
                            tracing::info!(connected, total = self.total, ring = ring_len, "Connection pool ready");
                        }
                        BringUpOutcome::NoServersAvailable => {
                            tracing::error!(total = self.total, "No server could be reached");
                        }
                    }
                    let _ = tx.send(outcome);
                }
            }
        }
        tracing::debug!("Pool coordinator exiting");
    }

    fn apply(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Connected { server, id } => {
                tracing::info!(server = %server, id = %id, "Member connected");
                self.connected.insert(server);
            }
            WorkerEvent::ConnectFailed { server, attempt } => {
                tracing::debug!(server = %server, attempt, "Connect attempt failed");
            }
            WorkerEvent::Disconnected { server, id, reason } => {
                tracing::info!(server = %server, id = %id, reason, "Member left the ring");
            }
            WorkerEvent::Exhausted { server } => {
                tracing::warn!(server = %server, "Member ran out of bring-up attempts, retrying in background");
                self.exhausted.insert(server);
            }
        }
    }

    fn decide(&self) -> Option<BringUpOutcome> {
        if self.ready_tx.is_none() {
            return None;
        }
        match self.policy {
            ReadinessPolicy::AnyOne if !self.connected.is_empty() => Some(BringUpOutcome::Ready {
                connected: self.connected.len(),
            }),
            ReadinessPolicy::AnyOne => None,
            ReadinessPolicy::AllRequired => {
                // An exhausted member may connect later; count each address once.
                let settled = self.connected.union(&self.exhausted).count();
                if settled < self.total {
                    None
                } else if self.connected.is_empty() {
                    Some(BringUpOutcome::NoServersAvailable)
                } else {
                    Some(BringUpOutcome::Ready {
                        connected: self.connected.len(),
                    })
                }
            }
        }
    }
}

/// Actor owning one configured address.
struct ServerWorker {
    server: ServerAddress,
    transport: Arc<dyn Transport>,
    ring: SharedRing,
    states: Arc<DashMap<String, MemberState>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    reconnect: ReconnectConfig,
    attempt_limit: Option<u32>,
    shutdown: ShutdownSignal,
}

impl ServerWorker {
    async fn run(self) {
        let ServerWorker {
            server,
            transport,
            ring,
            states,
            events,
            reconnect,
            attempt_limit,
            mut shutdown,
        } = self;
        let name = server.to_string();
        let set_state = |state: MemberState| {
            states.insert(name.clone(), state);
        };

        let mut bringing_up = true;
        let mut exhausted = false;
        let mut attempt: u32 = 0;

        loop {
            if !exhausted {
                set_state(MemberState::Connecting);
            }
            attempt = attempt.saturating_add(1);
            tracing::debug!(server = %name, attempt, "Connecting");

            let result = tokio::select! {
                _ = shutdown.recv() => break,
                result = transport.connect(&server) => result,
            };

            match result {
                Ok(link) => {
                    let member = Arc::new(PoolConnection::new(server.clone(), link));
                    let id = member.id();
                    let added = ring.lock().expect("ring mutex poisoned").add(member.clone());

                    if added {
                        attempt = 0;
                        bringing_up = false;
                        exhausted = false;
                        set_state(MemberState::Connected);
                        metrics::record_member_liveness(&name, true);
                        let _ = events.send(WorkerEvent::Connected {
                            server: name.clone(),
                            id,
                        });

                        let reason = tokio::select! {
                            _ = shutdown.recv() => {
                                ring.lock().expect("ring mutex poisoned").remove(&id);
                                member.close();
                                break;
                            }
                            reason = member.lost() => reason,
                        };

                        ring.lock().expect("ring mutex poisoned").remove(&id);
                        member.close();
                        metrics::record_member_liveness(&name, false);
                        set_state(MemberState::Failed);
                        let _ = events.send(WorkerEvent::Disconnected {
                            server: name.clone(),
                            id,
                            reason,
                        });
                    } else {
                        tracing::warn!(server = %name, "New link is not writable, discarding");
                        member.close();
                        if !exhausted {
                            set_state(MemberState::Failed);
                        }
                        metrics::record_connect_failure(&name);
                        let _ = events.send(WorkerEvent::ConnectFailed {
                            server: name.clone(),
                            attempt,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %name, attempt, error = %e, "Failed to connect");
                    if !exhausted {
                        set_state(MemberState::Failed);
                    }
                    metrics::record_connect_failure(&name);
                    let _ = events.send(WorkerEvent::ConnectFailed {
                        server: name.clone(),
                        attempt,
                    });
                }
            }

            if bringing_up && attempt_limit.is_some_and(|limit| attempt >= limit) {
                bringing_up = false;
                exhausted = true;
                set_state(MemberState::Exhausted);
                let _ = events.send(WorkerEvent::Exhausted { server: name.clone() });
            }

            let delay = reconnect_delay(&reconnect, attempt.max(1));
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        set_state(MemberState::Stopped);
        metrics::record_member_liveness(&name, false);
        tracing::debug!(server = %name, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, Response};
    use crate::transport::{Connection, TransportError, TransportResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Debug)]
    struct MemLink {
        writable: AtomicBool,
        closed: watch::Sender<bool>,
    }

    impl MemLink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writable: AtomicBool::new(true),
                closed: watch::channel(false).0,
            })
        }

        fn hang_up(&self) {
            self.writable.store(false, Ordering::SeqCst);
            self.closed.send_replace(true);
        }
    }

    #[async_trait]
    impl Connection for MemLink {
        async fn send(&self, _request: Request) -> TransportResult<Response> {
            Ok(Response::new(200, "{}"))
        }
        fn is_writable(&self) -> bool {
            self.writable.load(Ordering::SeqCst)
        }
        async fn closed(&self) {
            let mut rx = self.closed.subscribe();
            let _ = rx.wait_for(|c| *c).await;
        }
        fn close(&self) {
            self.writable.store(false, Ordering::SeqCst);
        }
    }

    /// Transport whose reachability is toggled per port.
    #[derive(Debug, Default)]
    struct MemTransport {
        up: Mutex<HashMap<u16, bool>>,
        links: Mutex<Vec<(u16, Arc<MemLink>)>>,
    }

    impl MemTransport {
        fn set_up(&self, port: u16, up: bool) {
            self.up.lock().unwrap().insert(port, up);
        }

        fn links_to(&self, port: u16) -> Vec<Arc<MemLink>> {
            self.links
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| *p == port)
                .map(|(_, l)| l.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MemTransport {
        async fn connect(&self, server: &ServerAddress) -> TransportResult<Arc<dyn Connection>> {
            let up = self.up.lock().unwrap().get(&server.port).copied().unwrap_or(false);
            if !up {
                return Err(TransportError::Connect {
                    server: server.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                });
            }
            let link = MemLink::new();
            self.links.lock().unwrap().push((server.port, link.clone()));
            Ok(link)
        }
    }

    fn addrs(ports: &[u16]) -> Vec<ServerAddress> {
        ports.iter().map(|p| ServerAddress::new("mem", *p)).collect()
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            base_delay_ms: 100,
            ..ReconnectConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_required_waits_for_every_member() {
        let transport = Arc::new(MemTransport::default());
        transport.set_up(1, true);
        let (sup, mut ready) = ConnectionSupervisor::connect_all(
            &addrs(&[1, 2]),
            ReadinessPolicy::AllRequired,
            transport.clone(),
            fast_reconnect(),
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(ready.try_recv().is_err());
        assert_eq!(sup.ring_len(), 1);

        transport.set_up(2, true);
        let outcome = tokio::time::timeout(Duration::from_secs(1), ready).await.unwrap().unwrap();
        assert_eq!(outcome, BringUpOutcome::Ready { connected: 2 });
        assert_eq!(sup.ring_len(), 2);
        assert_eq!(sup.connected_servers(), 2);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_one_is_ready_with_first_member() {
        let transport = Arc::new(MemTransport::default());
        transport.set_up(1, true);
        let servers = addrs(&[1, 2]);
        let (sup, ready) = ConnectionSupervisor::connect_all(
            &servers,
            ReadinessPolicy::AnyOne,
            transport.clone(),
            fast_reconnect(),
        );

        let outcome = tokio::time::timeout(Duration::from_secs(1), ready).await.unwrap().unwrap();
        assert_eq!(outcome, BringUpOutcome::Ready { connected: 1 });
        assert_eq!(sup.ring_len(), 1);
        assert_ne!(sup.member_state(&servers[1]), Some(MemberState::Connected));

        // The unreachable member keeps retrying and joins once it comes up.
        transport.set_up(2, true);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sup.ring_len(), 2);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_members_fail_bring_up() {
        let transport = Arc::new(MemTransport::default());
        let reconnect = ReconnectConfig {
            max_connect_attempts: Some(3),
            ..fast_reconnect()
        };
        let (sup, ready) = ConnectionSupervisor::connect_all(
            &addrs(&[1, 2]),
            ReadinessPolicy::AllRequired,
            transport,
            reconnect,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), ready).await.unwrap().unwrap();
        assert_eq!(outcome, BringUpOutcome::NoServersAvailable);
        assert_eq!(sup.member_state(&addrs(&[1])[0]), Some(MemberState::Exhausted));

        // Exhausted workers keep retrying until the pool is shut down.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sup.member_state(&addrs(&[2])[0]), Some(MemberState::Exhausted));
        sup.shutdown().await;
        assert_eq!(sup.member_state(&addrs(&[2])[0]), Some(MemberState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_success_with_exhausted_member_is_ready() {
        let transport = Arc::new(MemTransport::default());
        transport.set_up(1, true);
        let reconnect = ReconnectConfig {
            max_connect_attempts: Some(2),
            ..fast_reconnect()
        };
        let servers = addrs(&[1, 2]);
        let (sup, ready) = ConnectionSupervisor::connect_all(
            &servers,
            ReadinessPolicy::AllRequired,
            transport.clone(),
            reconnect,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), ready).await.unwrap().unwrap();
        assert_eq!(outcome, BringUpOutcome::Ready { connected: 1 });
        assert_eq!(sup.ring_len(), 1);
        assert_eq!(sup.member_state(&servers[1]), Some(MemberState::Exhausted));

        // The exhausted member keeps retrying and joins once it comes up.
        transport.set_up(2, true);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sup.ring_len(), 2);
        assert_eq!(sup.member_state(&servers[1]), Some(MemberState::Connected));
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_link_is_removed_and_replaced() {
        let transport = Arc::new(MemTransport::default());
        transport.set_up(1, true);
        let (sup, ready) = ConnectionSupervisor::connect_all(
            &addrs(&[1]),
            ReadinessPolicy::AllRequired,
            transport.clone(),
            fast_reconnect(),
        );
        ready.await.unwrap();

        let first = sup.select().unwrap();
        transport.links_to(1)[0].hang_up();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sup.ring_len(), 0);
        assert!(sup.select().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = sup.select().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(transport.links_to(1).len(), 2);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_failure_evicts_immediately() {
        let transport = Arc::new(MemTransport::default());
        transport.set_up(1, true);
        transport.set_up(2, true);
        let (sup, ready) = ConnectionSupervisor::connect_all(
            &addrs(&[1, 2]),
            ReadinessPolicy::AllRequired,
            transport.clone(),
            fast_reconnect(),
        );
        ready.await.unwrap();

        let victim = sup.select().unwrap();
        sup.report_failure(&victim);
        for _ in 0..4 {
            assert_ne!(sup.select().unwrap().id(), victim.id());
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sup.ring_len(), 2);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_retrying_workers() {
        let transport = Arc::new(MemTransport::default());
        transport.set_up(1, true);
        let (sup, _ready) = ConnectionSupervisor::connect_all(
            &addrs(&[1, 2]),
            ReadinessPolicy::AnyOne,
            transport.clone(),
            fast_reconnect(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(1), sup.shutdown())
            .await
            .expect("workers should exit");
        assert_eq!(sup.ring_len(), 0);
        assert!(sup.is_shut_down());
        assert_eq!(sup.member_state(&addrs(&[2])[0]), Some(MemberState::Stopped));

        transport.set_up(2, true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.links_to(2).is_empty());
    }
}
