//! Readiness gate and pending request queue.
//!
//! Phase and queue share one lock, so a request is either queued before the
//! phase flips (and handed to the drain) or admitted after it (and dispatched
//! directly). Nothing falls between the two.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::{oneshot, watch};

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bring-up in progress; requests queue.
    Starting,
    Ready,
    /// Bring-up failed.
    Failed,
    Closed,
}

/// A request that arrived before the pool was ready.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: Request,
    pub reply: oneshot::Sender<ClientResult<Response>>,
}

impl PendingRequest {
    pub fn complete(self, result: ClientResult<Response>) {
        // The caller may have stopped waiting.
        let _ = self.reply.send(result);
    }
}

/// Outcome of offering a request to the gate.
#[derive(Debug)]
pub enum Admission {
    /// Ready: dispatch now.
    Dispatch(Request),
    /// Not ready yet: the result arrives on this channel after the drain.
    Queued(oneshot::Receiver<ClientResult<Response>>),
    Rejected(ClientError),
}

#[derive(Debug)]
struct GateState {
    phase: Phase,
    pending: VecDeque<PendingRequest>,
}

#[derive(Debug)]
pub struct Gate {
    state: Mutex<GateState>,
    phase_tx: watch::Sender<Phase>,
}

impl Gate {
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(Phase::Starting);
        Self {
            state: Mutex::new(GateState {
                phase: Phase::Starting,
                pending: VecDeque::new(),
            }),
            phase_tx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().expect("gate mutex poisoned").phase
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn admit(&self, request: Request) -> Admission {
        let mut state = self.state.lock().expect("gate mutex poisoned");
        match state.phase {
            Phase::Ready => Admission::Dispatch(request),
            Phase::Starting => {
                let (reply, rx) = oneshot::channel();
                state.pending.push_back(PendingRequest { request, reply });
                Admission::Queued(rx)
            }
            Phase::Failed => Admission::Rejected(ClientError::NoServersAvailable),
            Phase::Closed => Admission::Rejected(ClientError::ClientClosed),
        }
    }

    /// Flip Starting → Ready and hand over the queue, in arrival order.
    ///
    /// Returns `None` if the gate already left Starting.
    pub fn open(&self) -> Option<Vec<PendingRequest>> {
        self.transition(Phase::Ready)
    }

    /// Flip Starting → Failed and hand over the queue.
    pub fn fail(&self) -> Option<Vec<PendingRequest>> {
        self.transition(Phase::Failed)
    }

    /// Move to Closed from any phase. Returns the queue, empty if already drained.
    ///
    /// The flag is `true` only for the call that actually closed the gate.
    pub fn close(&self) -> (bool, Vec<PendingRequest>) {
        let mut state = self.state.lock().expect("gate mutex poisoned");
        let first = state.phase != Phase::Closed;
        state.phase = Phase::Closed;
        let pending = state.pending.drain(..).collect();
        self.phase_tx.send_replace(Phase::Closed);
        (first, pending)
    }

    fn transition(&self, to: Phase) -> Option<Vec<PendingRequest>> {
        let mut state = self.state.lock().expect("gate mutex poisoned");
        if state.phase != Phase::Starting {
            return None;
        }
        state.phase = to;
        let pending = state.pending.drain(..).collect();
        self.phase_tx.send_replace(to);
        Some(pending)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
