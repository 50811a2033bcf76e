//! Boundary between the node and the replication engine.
//!
//! The engine is opaque: it takes proposals and membership changes from two
//! bounded queues and hands back committed entries on a third. Everything
//! else it reports through one-shot signals (readiness, fatal failure) and a
//! status watch channel.
//!
//! ```text
//!   NodeHandle ──proposals──►┌──────────────┐──commits──► ClusterNode loop
//!   NodeHandle ──membership─►│    Engine    │──ready────► (startup only)
//!                            │              │──fatal────► (at most once)
//!   KvStateMachine ◄─────────│ SnapshotSource              status ──► NodeHandle
//!                            └──────────────┘
//! ```

mod loopback;

pub use loopback::LoopbackEngine;

use crate::error::ClusterResult;
use crate::types::{ClusterNodeId, CommitBatch, FatalSignal, LogIndex, MembershipChange, Proposal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Produces a serialized snapshot of the applied state on demand.
///
/// The engine calls this when it needs a snapshot of its own, e.g. to bring
/// a new member up to date.
pub trait SnapshotSource: Send + Sync {
    /// Serialize the current state.
    fn produce_snapshot(&self) -> ClusterResult<Vec<u8>>;
}

/// Everything the node hands to the engine at start.
pub struct EngineIo {
    /// Client proposals, in submission order.
    pub proposals: mpsc::Receiver<Proposal>,
    /// Membership change requests.
    pub membership: mpsc::Receiver<MembershipChange>,
    /// Snapshot callback into the state machine.
    pub snapshots: Arc<dyn SnapshotSource>,
    /// Capacity the engine must use for its commit queue.
    pub commit_capacity: usize,
}

/// Everything the engine hands back to the node.
pub struct EngineEvents {
    /// Committed entries, in log order.
    pub commits: mpsc::Receiver<CommitBatch>,
    /// Unrecoverable failure. Nothing is sent on `commits` after it fires.
    pub fatal: oneshot::Receiver<FatalSignal>,
    /// Fires once the engine has replayed its own log.
    pub ready: oneshot::Receiver<EngineReady>,
    /// Latest engine status.
    pub status: watch::Receiver<EngineStatus>,
}

/// The engine side of [`EngineEvents`].
pub struct EngineSenders {
    /// Commit queue.
    pub commits: mpsc::Sender<CommitBatch>,
    /// Fatal signal.
    pub fatal: oneshot::Sender<FatalSignal>,
    /// Readiness signal.
    pub ready: oneshot::Sender<EngineReady>,
    /// Status publisher.
    pub status: watch::Sender<EngineStatus>,
}

/// Create the event channels for an engine.
pub fn event_channels(
    node_id: ClusterNodeId,
    commit_capacity: usize,
) -> (EngineSenders, EngineEvents) {
    let (commits_tx, commits_rx) = mpsc::channel(commit_capacity.max(1));
    let (fatal_tx, fatal_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (status_tx, status_rx) = watch::channel(EngineStatus::new(node_id));

    (
        EngineSenders {
            commits: commits_tx,
            fatal: fatal_tx,
            ready: ready_tx,
            status: status_tx,
        },
        EngineEvents {
            commits: commits_rx,
            fatal: fatal_rx,
            ready: ready_rx,
            status: status_rx,
        },
    )
}

/// Readiness handshake payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineReady {
    /// Highest index the engine knows to be committed. The node replays its
    /// local log up to here before it starts serving.
    pub commit_index: LogIndex,
}

/// Role of this node as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Accepts proposals and replicates them.
    Leader,
    /// Replicates from the leader.
    Follower,
    /// Standing for election.
    Candidate,
    /// Non-voting member catching up.
    Learner,
}

/// Engine status as published on the status channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// This node's ID.
    pub node_id: ClusterNodeId,
    /// Current role.
    pub role: Role,
    /// Current term.
    pub term: u64,
    /// Highest committed index.
    pub commit_index: LogIndex,
    /// Current voting members.
    pub members: BTreeSet<ClusterNodeId>,
}

impl EngineStatus {
    /// Status of a node that has not joined anything yet.
    pub fn new(node_id: ClusterNodeId) -> Self {
        Self {
            node_id,
            role: Role::Follower,
            term: 0,
            commit_index: 0,
            members: BTreeSet::new(),
        }
    }

    /// Whether this node is the leader.
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

/// A replication engine the node can drive.
///
/// `start` is called once, from inside a tokio runtime, and must return
/// immediately; the engine does its work on tasks it spawns. The engine
/// should stop once both input queues are closed and drained, and must stop
/// emitting batches once it has sent a fatal signal.
pub trait ReplicationEngine: Send + 'static {
    /// Start the engine.
    fn start(self, io: EngineIo) -> EngineEvents;
}
