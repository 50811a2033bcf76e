//! The commit loop.
//!
//! One task owns the write side of the state machine. It applies commit
//! batches in arrival order, decides when to snapshot and compact, and
//! carries the node through shutdown.

use crate::config::SnapshotConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::state::KvStateMachine;
use crate::storage::{SnapshotName, SnapshotStore, compact_segments};
use crate::types::{CommitBatch, FatalSignal, LogIndex, MembershipChange, Proposal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use super::{NodeState, ShutdownReason};

/// Reply channel for an on-demand snapshot.
pub(super) type SnapshotReply = oneshot::Sender<ClusterResult<Option<SnapshotName>>>;

/// Input channels of the commit loop.
pub(super) struct RunnerInputs {
    pub commits: mpsc::Receiver<CommitBatch>,
    pub fatal: Option<oneshot::Receiver<FatalSignal>>,
    pub shutdown: oneshot::Receiver<()>,
    pub snapshot_requests: mpsc::Receiver<SnapshotReply>,
}

pub(super) struct Runner {
    pub node_id: u64,
    pub machine: Arc<KvStateMachine>,
    pub store: SnapshotStore,
    pub wal_dir: PathBuf,
    pub snapshot: SnapshotConfig,
    pub state: watch::Sender<NodeState>,
    /// The only strong senders of the engine's input queues. Handles hold
    /// weak ones, so dropping these lets the engine see its inputs close.
    pub admission: Option<(mpsc::Sender<Proposal>, mpsc::Sender<MembershipChange>)>,
    /// Entries applied since the last successful snapshot.
    pub since_snapshot: u64,
    /// Index covered by the newest snapshot on disk.
    pub snapshot_index: LogIndex,
}

impl Runner {
    pub async fn run(mut self, inputs: RunnerInputs) -> ClusterResult<ShutdownReason> {
        let RunnerInputs {
            mut commits,
            mut fatal,
            mut shutdown,
            mut snapshot_requests,
        } = inputs;

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.snapshot_interval(),
            self.snapshot_interval(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requests_open = true;

        let outcome = loop {
            tokio::select! {
                batch = commits.recv() => match batch {
                    Some(batch) => {
                        if let Err(e) = self.handle_batch(batch) {
                            break Err(e);
                        }
                    }
                    None => {
                        // A failing engine closes the queue right after the signal
                        if let Some(signal) = fatal.as_mut().and_then(|rx| rx.try_recv().ok()) {
                            break Err(ClusterError::Fatal(signal.reason));
                        }
                        break Ok(ShutdownReason::EngineClosed);
                    }
                },
                signal = next_fatal(&mut fatal) => {
                    break Err(ClusterError::Fatal(signal.reason));
                }
                _ = &mut shutdown => {
                    break Ok(ShutdownReason::Requested);
                }
                request = snapshot_requests.recv(), if requests_open => match request {
                    Some(reply) => {
                        let _ = reply.send(self.take_snapshot());
                    }
                    None => requests_open = false,
                },
                _ = ticker.tick() => {
                    if self.since_snapshot > 0 {
                        tracing::debug!(node_id = self.node_id, "Snapshot interval elapsed");
                        let _ = self.take_snapshot();
                    }
                }
            }
        };

        match &outcome {
            Ok(reason) => tracing::info!(node_id = self.node_id, ?reason, "Node shutting down"),
            Err(e) => tracing::error!(
                node_id = self.node_id,
                error = %e,
                "Node shutting down after fatal error"
            ),
        }

        let drained = self.shut_down(&mut commits).await;
        self.state.send_replace(NodeState::Stopped);
        tracing::info!(node_id = self.node_id, "Node stopped");

        match (outcome, drained) {
            (Ok(_), Err(e)) => Err(e),
            (outcome, _) => outcome,
        }
    }

    /// Stop admitting work and apply everything already committed.
    ///
    /// Closing the queue rejects further sends from the engine; batches
    /// already queued, or already granted a slot, are still received.
    async fn shut_down(&mut self, commits: &mut mpsc::Receiver<CommitBatch>) -> ClusterResult<()> {
        self.state.send_replace(NodeState::ShuttingDown);
        drop(self.admission.take());
        commits.close();

        let mut drained = 0usize;
        while let Some(batch) = commits.recv().await {
            if let Err(e) = self.handle_batch(batch) {
                tracing::error!(
                    node_id = self.node_id,
                    error = %e,
                    "Failed to apply batch during shutdown"
                );
                return Err(e);
            }
            drained += 1;
        }

        if drained > 0 {
            tracing::info!(
                node_id = self.node_id,
                batches = drained,
                "Applied queued batches before stopping"
            );
        }
        Ok(())
    }

    /// Apply one commit batch, then check the entry-count trigger.
    fn handle_batch(&mut self, batch: CommitBatch) -> ClusterResult<()> {
        if let Some(name) = &batch.snapshot_marker {
            tracing::info!(
                node_id = self.node_id,
                snapshot = %name,
                "Loading snapshot from engine"
            );
            let data = self.store.load(name)?;
            self.machine.restore(&data)?;
            self.since_snapshot = 0;
            self.snapshot_index = self.machine.applied_index();
        }

        let report = self.machine.apply(&batch.entries)?;
        self.since_snapshot += report.applied as u64;

        if self.since_snapshot >= self.snapshot.entry_threshold {
            let _ = self.take_snapshot();
        }
        Ok(())
    }

    /// Snapshot the state machine, then compact the log behind it.
    ///
    /// Returns `Ok(None)` when nothing was applied since the newest snapshot.
    /// A failure leaves the trigger armed, so the next batch or tick retries.
    fn take_snapshot(&mut self) -> ClusterResult<Option<SnapshotName>> {
        let (index, data) = self.machine.snapshot_at()?;
        if index == self.snapshot_index {
            return Ok(None);
        }

        let name = match self.store.save(index, &data) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(
                    node_id = self.node_id,
                    index,
                    error = %e,
                    "Failed to save snapshot, will retry"
                );
                return Err(e);
            }
        };

        self.since_snapshot = 0;
        self.snapshot_index = index;
        self.compact();
        Ok(Some(name))
    }

    /// Delete segments that every retained snapshot covers.
    fn compact(&self) {
        let floor = match self.store.compaction_floor() {
            Ok(Some(floor)) => floor,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(
                    node_id = self.node_id,
                    error = %e,
                    "Failed to determine compaction floor"
                );
                return;
            }
        };

        match compact_segments(&self.wal_dir, floor) {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(
                    node_id = self.node_id,
                    floor,
                    segments = removed.len(),
                    "Compacted log"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(node_id = self.node_id, floor, error = %e, "Failed to compact log");
            }
        }
    }

    fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot.interval_ms.max(1))
    }
}

/// Resolve with the engine's fatal signal, or never.
///
/// The slot is cleared once the receiver has completed, since a finished
/// oneshot receiver must not be polled again. An engine that drops the
/// sender without firing it has no fatal error to report.
pub(super) async fn next_fatal(slot: &mut Option<oneshot::Receiver<FatalSignal>>) -> FatalSignal {
    if let Some(rx) = slot.as_mut() {
        let received = rx.await;
        *slot = None;
        if let Ok(signal) = received {
            return signal;
        }
    }
    std::future::pending().await
}
