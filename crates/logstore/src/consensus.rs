//! Capability interfaces consumed by the log store.
//!
//! The consensus manager and the log store reference each other; the cycle
//! is broken by having the store depend only on this narrow surface, which
//! the consensus module implements and injects by handle. The store never
//! learns about elections, transports, or peers.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// What the write coordinator needs from the consensus module.
pub trait ConsensusHandle: Send + Sync {
    /// The current consensus term, stamped on leader-side appends.
    fn current_term(&self) -> i64;

    /// Whether this node currently believes it is the leader.
    fn is_leader(&self) -> bool;

    /// Start replicating the entry named by `request` to followers. The
    /// consensus module completes the request once a quorum acknowledges,
    /// or fails it on demotion or timeout.
    fn replicate(&self, request: Arc<ReplicaRequest>);
}

/// What the federated sub-store needs from the cross-cluster replicator.
pub trait FedReplicator: Send + Sync {
    /// Fan a federated command out to peer zones.
    fn replicate(&self, cmd: &str);
}

/// Outcome of a replication round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaOutcome {
    /// A quorum of followers holds the entry.
    pub replicated: bool,
    /// Failure detail when `replicated` is false.
    pub message: String,
}

/// One-shot rendezvous between a writer waiting for quorum and the
/// consensus acknowledgement handler.
///
/// The request is shared as an `Arc`: the writer and the consensus module
/// each hold a reference, so the handler can never signal a destroyed
/// request. The first `complete` wins; later completions are ignored.
#[derive(Debug)]
pub struct ReplicaRequest {
    index: i64,
    outcome: Mutex<Option<ReplicaOutcome>>,
    signal: Condvar,
}

impl ReplicaRequest {
    pub fn new(index: i64) -> Arc<Self> {
        Arc::new(Self {
            index,
            outcome: Mutex::new(None),
            signal: Condvar::new(),
        })
    }

    /// The log index whose replication this request tracks.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Record the outcome and wake the waiter. Idempotent.
    pub fn complete(&self, replicated: bool, message: impl Into<String>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(ReplicaOutcome {
                replicated,
                message: message.into(),
            });
            self.signal.notify_all();
        }
    }

    /// Block until the consensus module completes this request. The wait is
    /// bounded by the consensus-side replication timeout, which fails the
    /// request rather than abandoning it.
    pub fn wait(&self) -> ReplicaOutcome {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .signal
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
