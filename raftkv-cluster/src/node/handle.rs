//! Client-facing handle to a running node.

use crate::command::KvCommand;
use crate::engine::EngineStatus;
use crate::error::{ClusterError, ClusterResult};
use crate::state::KvStateMachine;
use crate::types::{ClusterNodeId, LogIndex, MembershipChange, Proposal};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;

use super::NodeState;

/// Node and engine status, as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    /// This node's ID.
    pub node_id: ClusterNodeId,
    /// Lifecycle state of the node.
    pub state: NodeState,
    /// Index of the last entry applied to the key-value map.
    pub applied_index: LogIndex,
    /// Number of keys in the map.
    pub keys: usize,
    /// What the engine last reported.
    pub engine: EngineStatus,
}

/// What a client API calls into.
///
/// Cheap to clone. Writes are accepted only while the node is running: once
/// shutdown starts every pending and future write fails with
/// [`ClusterError::ShuttingDown`], including writes blocked on a full queue.
/// Reads keep answering from the last applied state.
#[derive(Clone)]
pub struct NodeHandle {
    node_id: ClusterNodeId,
    proposals: mpsc::WeakSender<Proposal>,
    membership: mpsc::WeakSender<MembershipChange>,
    machine: Arc<KvStateMachine>,
    state: watch::Receiver<NodeState>,
    engine_status: watch::Receiver<EngineStatus>,
}

impl NodeHandle {
    pub(super) fn new(
        node_id: ClusterNodeId,
        proposals: mpsc::WeakSender<Proposal>,
        membership: mpsc::WeakSender<MembershipChange>,
        machine: Arc<KvStateMachine>,
        state: watch::Receiver<NodeState>,
        engine_status: watch::Receiver<EngineStatus>,
    ) -> Self {
        Self {
            node_id,
            proposals,
            membership,
            machine,
            state,
            engine_status,
        }
    }

    /// Submit `key = value` for replication.
    ///
    /// Returns once the proposal is queued for the engine, not once it is
    /// committed. Blocks while the proposal queue is full.
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) -> ClusterResult<()> {
        let proposal = KvCommand::put(key, value).to_proposal()?;
        self.propose(proposal).await
    }

    /// Submit many puts, at most `concurrency` in flight at once.
    ///
    /// Submissions race each other, so their relative order in the log is
    /// unspecified. Returns the number of puts queued, or the first error.
    pub async fn batch_put<I, K, V>(&self, items: I, concurrency: usize) -> ClusterResult<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let limit = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (key, value) in items {
            let permit = limit
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ClusterError::ShuttingDown)?;
            let handle = self.clone();
            let (key, value) = (key.into(), value.into());
            tasks.spawn(async move {
                let _permit = permit;
                handle.put(key, value).await
            });
        }

        let mut queued = 0;
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => queued += 1,
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(ClusterError::Fatal(format!("put task failed: {e}")));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    /// Submit a raw proposal.
    pub async fn propose(&self, proposal: Proposal) -> ClusterResult<()> {
        self.submit(&self.proposals, proposal).await
    }

    /// Ask the cluster to add `node_id`; `context` is passed to the engine.
    pub async fn add_member(
        &self,
        node_id: ClusterNodeId,
        context: impl Into<Vec<u8>>,
    ) -> ClusterResult<()> {
        tracing::info!(node_id, "Requesting membership addition");
        self.submit(&self.membership, MembershipChange::add(node_id, context))
            .await
    }

    /// Ask the cluster to remove `node_id`.
    pub async fn remove_member(&self, node_id: ClusterNodeId) -> ClusterResult<()> {
        tracing::info!(node_id, "Requesting membership removal");
        self.submit(&self.membership, MembershipChange::remove(node_id))
            .await
    }

    async fn submit<T>(&self, queue: &mpsc::WeakSender<T>, item: T) -> ClusterResult<()> {
        if !self.state.borrow().accepts_writes() {
            return Err(ClusterError::ShuttingDown);
        }
        let tx = queue.upgrade().ok_or(ClusterError::ShuttingDown)?;

        let mut state = self.state.clone();
        tokio::select! {
            biased;
            _ = state.wait_for(|s| !s.accepts_writes()) => Err(ClusterError::ShuttingDown),
            sent = tx.send(item) => sent.map_err(|_| ClusterError::EngineClosed),
        }
    }

    /// Current value of `key` in the applied state.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.machine.lookup(key)
    }

    /// Index of the last applied entry.
    pub fn applied_index(&self) -> LogIndex {
        self.machine.applied_index()
    }

    /// Lifecycle state of the node.
    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    /// Current node and engine status.
    pub fn status(&self) -> NodeStatus {
        let (applied_index, keys) = {
            let state = self.machine.state();
            (state.applied_index, state.data.len())
        };

        NodeStatus {
            node_id: self.node_id,
            state: self.state(),
            applied_index,
            keys,
            engine: self.engine_status.borrow().clone(),
        }
    }

    /// The state machine, for reads that need more than one key at a time.
    pub fn state_machine(&self) -> &KvStateMachine {
        &self.machine
    }
}
