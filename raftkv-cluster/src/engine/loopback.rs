//! Single-node replication engine.
//!
//! With one voting member every proposal is committed as soon as it is
//! durable locally, so this engine appends proposals to segment files and
//! hands them straight back as commit batches. It is the engine a
//! one-member cluster runs with.

use crate::config::NodeConfig;
use crate::error::ClusterResult;
use crate::storage::SegmentWriter;
use crate::types::{
    ChangeType, ClusterNodeId, CommitBatch, EntryPayload, FatalSignal, LogEntry, LogIndex,
    MembershipChange, Proposal,
};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};

use super::{
    EngineEvents, EngineIo, EngineReady, EngineSenders, EngineStatus, ReplicationEngine, Role,
    SnapshotSource, event_channels,
};

/// Default maximum number of proposals committed in one batch.
const DEFAULT_MAX_BATCH: usize = 128;

/// Commits every proposal locally.
#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    /// This node's ID.
    node_id: ClusterNodeId,
    /// Directory for segment files.
    wal_dir: PathBuf,
    /// Entries per segment before rotating.
    segment_max_entries: usize,
    /// Proposals drained from the queue into one batch at most.
    max_batch: usize,
}

impl LoopbackEngine {
    /// Create an engine writing to the node's log directory.
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            node_id: config.node_id,
            wal_dir: config.wal_dir(),
            segment_max_entries: config.segment_max_entries,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    /// Set the maximum number of proposals per commit batch.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    async fn run(self, io: EngineIo, senders: EngineSenders) {
        let EngineSenders {
            commits,
            fatal,
            ready,
            status,
        } = senders;

        // The commit queue and the readiness sender stay open until the
        // fatal signal is out, so the node never mistakes a failure for a
        // clean close.
        let mut ready = Some(ready);
        if let Err(e) = self.replicate(io, &commits, &mut ready, &status).await {
            tracing::error!(node_id = self.node_id, error = %e, "Loopback engine failed");
            let _ = fatal.send(FatalSignal::new(e.to_string()));
        }
        drop(ready);

        tracing::debug!(node_id = self.node_id, "Loopback engine stopped");
    }

    async fn replicate(
        &self,
        io: EngineIo,
        commits: &mpsc::Sender<CommitBatch>,
        ready: &mut Option<oneshot::Sender<EngineReady>>,
        status: &watch::Sender<EngineStatus>,
    ) -> ClusterResult<()> {
        let mut writer = SegmentWriter::open(&self.wal_dir, self.segment_max_entries)?;
        let commit_index = writer.last_index();

        status.send_modify(|s| {
            s.role = Role::Leader;
            s.term = 1;
            s.commit_index = commit_index;
            s.members.insert(self.node_id);
        });

        tracing::info!(node_id = self.node_id, commit_index, "Loopback engine ready");

        let Some(ready) = ready.take() else {
            return Ok(());
        };
        if ready.send(EngineReady { commit_index }).is_err() {
            // Node gave up during startup
            return Ok(());
        }

        let EngineIo {
            mut proposals,
            mut membership,
            snapshots,
            ..
        } = io;
        let mut proposals_open = true;
        let mut membership_open = true;

        loop {
            let next_index = writer.last_index() + 1;

            let entries = tokio::select! {
                proposal = proposals.recv(), if proposals_open => match proposal {
                    Some(first) => self.collect_batch(first, &mut proposals, next_index),
                    None => {
                        proposals_open = false;
                        continue;
                    }
                },
                change = membership.recv(), if membership_open => match change {
                    Some(change) => {
                        self.prepare_member(&change, snapshots.as_ref());
                        vec![LogEntry {
                            index: next_index,
                            payload: EntryPayload::Membership(change),
                        }]
                    }
                    None => {
                        membership_open = false;
                        continue;
                    }
                },
                else => break,
            };

            writer.append(&entries)?;
            let commit_index = writer.last_index();

            status.send_modify(|s| {
                s.commit_index = commit_index;
                for entry in &entries {
                    if let EntryPayload::Membership(change) = &entry.payload {
                        match change.change_type {
                            ChangeType::Add => s.members.insert(change.node_id),
                            ChangeType::Remove => s.members.remove(&change.node_id),
                        };
                    }
                }
            });

            if commits.send(CommitBatch::new(entries)).await.is_err() {
                tracing::debug!(node_id = self.node_id, "Commit queue closed");
                break;
            }
        }

        Ok(())
    }

    /// Drain whatever else is already queued behind `first`.
    fn collect_batch(
        &self,
        first: Proposal,
        rx: &mut mpsc::Receiver<Proposal>,
        first_index: LogIndex,
    ) -> Vec<LogEntry> {
        let mut entries = vec![LogEntry::normal(first_index, first)];

        while entries.len() < self.max_batch {
            match rx.try_recv() {
                Ok(proposal) => {
                    let index = first_index + entries.len() as u64;
                    entries.push(LogEntry::normal(index, proposal));
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }

        entries
    }

    /// A joining member starts from a snapshot of the current state.
    ///
    /// There is no peer transport in a single-node cluster, so the snapshot
    /// is only produced and measured.
    fn prepare_member(&self, change: &MembershipChange, snapshots: &dyn SnapshotSource) {
        if change.change_type != ChangeType::Add || change.node_id == self.node_id {
            return;
        }

        match snapshots.produce_snapshot() {
            Ok(data) => tracing::info!(
                node_id = change.node_id,
                bytes = data.len(),
                "Prepared catch-up snapshot for joining member"
            ),
            Err(e) => tracing::warn!(
                node_id = change.node_id,
                error = %e,
                "Failed to prepare catch-up snapshot"
            ),
        }
    }
}

impl ReplicationEngine for LoopbackEngine {
    fn start(self, io: EngineIo) -> EngineEvents {
        let (senders, events) = event_channels(self.node_id, io.commit_capacity);
        tokio::spawn(self.run(io, senders));
        events
    }
}
