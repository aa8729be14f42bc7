//! Human-in-the-loop confirmation gate for sensitive tools.
//!
//! Each call that needs approval gets a [`ConfirmationTicket`] backed by a
//! oneshot channel. Requests queue FIFO; only the head is shown to the
//! operator, and resolving it promotes the next one.

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// How a pending confirmation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    /// Dropped without an answer (session closed or call withdrawn).
    Discarded,
    TimedOut,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Approved => write!(f, "APPROVED"),
            Decision::Rejected => write!(f, "REJECTED"),
            Decision::Discarded => write!(f, "DISCARDED"),
            Decision::TimedOut => write!(f, "TIMED OUT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pending request
// ---------------------------------------------------------------------------

/// What the operator is asked to approve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationRequest {
    pub call_id: String,
    pub tool_id: String,
    pub tool_name: String,
    pub description: String,
    pub args: Value,
}

struct PendingConfirmation {
    request: ConfirmationRequest,
    responder: oneshot::Sender<bool>,
}

/// The waiting side of one request.
#[derive(Debug)]
pub struct ConfirmationTicket {
    pub call_id: String,
    rx: oneshot::Receiver<bool>,
}

impl ConfirmationTicket {
    /// Wait for the operator. `None` waits until answered or discarded.
    pub async fn wait(self, timeout: Option<Duration>) -> Decision {
        let answer = match timeout {
            None => self.rx.await,
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(answer) => answer,
                Err(_) => return Decision::TimedOut,
            },
        };
        match answer {
            Ok(true) => Decision::Approved,
            Ok(false) => Decision::Rejected,
            Err(_) => Decision::Discarded,
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ConfirmationGate {
    queue: VecDeque<PendingConfirmation>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request. The flag is true when it went straight to the head.
    pub fn submit(&mut self, request: ConfirmationRequest) -> (ConfirmationTicket, bool) {
        let (tx, rx) = oneshot::channel();
        let ticket = ConfirmationTicket {
            call_id: request.call_id.clone(),
            rx,
        };
        info!(
            target: "voxbuild::live",
            "Confirmation required for {} (call {})", request.tool_name, request.call_id
        );
        self.queue.push_back(PendingConfirmation {
            request,
            responder: tx,
        });
        (ticket, self.queue.len() == 1)
    }

    /// The request currently shown to the operator.
    pub fn current(&self) -> Option<&ConfirmationRequest> {
        self.queue.front().map(|p| &p.request)
    }

    /// Answer the head request.
    ///
    /// The head is removed either way; `None` when its waiter already gave up.
    pub fn resolve_current(&mut self, approved: bool) -> Option<ConfirmationRequest> {
        let pending = self.queue.pop_front()?;
        Self::answer(pending, approved)
    }

    /// Answer a specific request by call id, wherever it sits in the queue.
    pub fn resolve(&mut self, call_id: &str, approved: bool) -> Option<ConfirmationRequest> {
        let idx = self.position(call_id)?;
        let pending = self.queue.remove(idx)?;
        Self::answer(pending, approved)
    }

    /// Drop a request without answering; its ticket sees [`Decision::Discarded`].
    pub fn withdraw(&mut self, call_id: &str) -> Option<ConfirmationRequest> {
        let idx = self.position(call_id)?;
        let pending = self.queue.remove(idx)?;
        debug!(target: "voxbuild::live", "Confirmation withdrawn for call {}", call_id);
        Some(pending.request)
    }

    /// Drop every request; returns how many were open.
    pub fn discard_all(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        if n > 0 {
            info!(target: "voxbuild::live", "Discarded {} pending confirmation(s)", n);
        }
        n
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn position(&self, call_id: &str) -> Option<usize> {
        self.queue.iter().position(|p| p.request.call_id == call_id)
    }

    fn answer(pending: PendingConfirmation, approved: bool) -> Option<ConfirmationRequest> {
        if pending.responder.send(approved).is_err() {
            debug!(
                target: "voxbuild::live",
                "Late answer for call {} dropped", pending.request.call_id
            );
            return None;
        }
        info!(
            target: "voxbuild::live",
            "Operator {} {}",
            if approved { "approved" } else { "rejected" },
            pending.request.tool_name
        );
        Some(pending.request)
    }
}
