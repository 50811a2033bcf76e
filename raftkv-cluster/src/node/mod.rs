//! ClusterNode - owns the engine lifecycle and the commit loop.
//!
//! ```text
//!  Recovering ──ready + replay──► Running ──stop / fatal / engine gone──► ShuttingDown ──drained──► Stopped
//! ```
//!
//! Startup waits for the engine's readiness signal, rebuilds the state
//! machine from the newest snapshot and the log after it, and only then
//! hands out a [`NodeHandle`]. A node that cannot recover never serves.

mod handle;
mod recovery;
mod runner;

pub use handle::{NodeHandle, NodeStatus};
pub use recovery::{RecoveryReport, last_logged_index, recover};

use crate::config::NodeConfig;
use crate::engine::{EngineEvents, EngineIo, ReplicationEngine};
use crate::error::{ClusterError, ClusterResult};
use crate::state::KvStateMachine;
use crate::storage::{SnapshotName, SnapshotStore};
use crate::types::ClusterNodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use runner::{Runner, RunnerInputs, SnapshotReply, next_fatal};

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Waiting for the engine and replaying the log.
    Recovering,
    /// Serving reads and writes.
    Running,
    /// Rejecting writes, applying what is already committed.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

impl NodeState {
    /// Whether new proposals and membership changes are admitted.
    pub fn accepts_writes(self) -> bool {
        self == NodeState::Running
    }
}

/// Why a node stopped cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownReason {
    /// [`ClusterNode::shutdown`] was called or the node was dropped.
    Requested,
    /// The engine closed its commit queue.
    EngineClosed,
}

/// A running node.
///
/// Dropping the node requests shutdown; use [`ClusterNode::wait`] to learn
/// how it ended.
pub struct ClusterNode {
    /// This node's ID.
    node_id: ClusterNodeId,
    /// The state machine (for read-only queries).
    machine: Arc<KvStateMachine>,
    /// Lifecycle state.
    state: watch::Receiver<NodeState>,
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// On-demand snapshot requests.
    snapshot_tx: mpsc::Sender<SnapshotReply>,
    /// The commit loop.
    task: Option<JoinHandle<ClusterResult<ShutdownReason>>>,
}

impl ClusterNode {
    /// Start a node on top of `engine`.
    ///
    /// Resolves once recovery is complete and the node is running. Fails if
    /// the configuration is invalid, the engine fails or goes away before
    /// it is ready, or the local state cannot be recovered.
    pub async fn start<E: ReplicationEngine>(
        config: NodeConfig,
        engine: E,
    ) -> ClusterResult<(ClusterNode, NodeHandle)> {
        config.validate().map_err(ClusterError::Config)?;

        let node_id = config.node_id;
        let store = SnapshotStore::open(config.snap_dir(), config.snapshot.retention_count)?;
        let machine = Arc::new(KvStateMachine::new());

        let (proposal_tx, proposal_rx) = mpsc::channel(config.queues.proposal_capacity);
        let (membership_tx, membership_rx) = mpsc::channel(config.queues.membership_capacity);
        let (state_tx, state_rx) = watch::channel(NodeState::Recovering);

        tracing::info!(node_id, data_dir = %config.data_dir.display(), "Starting cluster node");

        let EngineEvents {
            commits,
            fatal,
            ready,
            status,
        } = engine.start(EngineIo {
            proposals: proposal_rx,
            membership: membership_rx,
            snapshots: machine.clone(),
            commit_capacity: config.queues.commit_capacity,
        });

        let mut fatal = Some(fatal);
        let commit_index = tokio::select! {
            biased;
            signal = next_fatal(&mut fatal) => {
                tracing::error!(node_id, reason = %signal, "Engine failed before becoming ready");
                return Err(ClusterError::Fatal(signal.reason));
            }
            ready = ready => match ready {
                Ok(ready) => ready.commit_index,
                Err(_) => {
                    tracing::error!(node_id, "Engine stopped before becoming ready");
                    return Err(ClusterError::EngineClosed);
                }
            },
        };

        let report = match recover(Some(&store), &config.wal_dir(), &machine, commit_index) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(node_id, error = %e, "Recovery failed");
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (snapshot_tx, snapshot_rx) = mpsc::channel(1);

        let handle = NodeHandle::new(
            node_id,
            proposal_tx.downgrade(),
            membership_tx.downgrade(),
            machine.clone(),
            state_rx.clone(),
            status,
        );

        let runner = Runner {
            node_id,
            machine: machine.clone(),
            store,
            wal_dir: config.wal_dir(),
            snapshot: config.snapshot.clone(),
            state: state_tx,
            admission: Some((proposal_tx, membership_tx)),
            since_snapshot: report.replayed as u64,
            snapshot_index: report.snapshot_index,
        };

        runner.state.send_replace(NodeState::Running);
        tracing::info!(node_id, applied_index = report.applied_index, "Cluster node running");

        let task = tokio::spawn(runner.run(RunnerInputs {
            commits,
            fatal,
            shutdown: shutdown_rx,
            snapshot_requests: snapshot_rx,
        }));

        let node = ClusterNode {
            node_id,
            machine,
            state: state_rx,
            shutdown_tx: Some(shutdown_tx),
            snapshot_tx,
            task: Some(task),
        };

        Ok((node, handle))
    }

    /// Get this node's ID.
    pub fn node_id(&self) -> ClusterNodeId {
        self.node_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.state.clone()
    }

    /// Get a reference to the state machine for read-only queries.
    pub fn state_machine(&self) -> &KvStateMachine {
        &self.machine
    }

    /// Snapshot now instead of waiting for a trigger.
    ///
    /// Returns the new snapshot's name, or `None` if nothing was applied
    /// since the last one.
    pub async fn trigger_snapshot(&self) -> ClusterResult<Option<SnapshotName>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.snapshot_tx
            .send(reply_tx)
            .await
            .map_err(|_| ClusterError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ClusterError::ShuttingDown)?
    }

    /// Ask the node to stop. Returns immediately; see [`ClusterNode::wait`].
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tracing::info!(node_id = self.node_id, "Shutdown requested");
            let _ = tx.send(());
        }
    }

    /// Wait for the node to stop.
    ///
    /// A fatal engine signal or an out-of-order commit comes back as an
    /// error after everything already committed has been applied.
    pub async fn wait(mut self) -> ClusterResult<ShutdownReason> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ClusterError::Fatal(format!("commit loop panicked: {e}")))?,
            None => Ok(ShutdownReason::Requested),
        }
    }

    /// Request shutdown and wait for it to finish.
    pub async fn stop(mut self) -> ClusterResult<ShutdownReason> {
        self.shutdown();
        self.wait().await
    }
}

impl Drop for ClusterNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
