//! Common test utilities for raftkv-cluster tests.

use raftkv_cluster::command::KvCommand;
use raftkv_cluster::engine::{
    EngineEvents, EngineIo, EngineReady, EngineSenders, EngineStatus, ReplicationEngine,
    event_channels,
};
use raftkv_cluster::types::{CommitBatch, FatalSignal, LogEntry, LogIndex};
use raftkv_cluster::{ClusterError, ClusterNode, NodeConfig, NodeHandle};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// An engine driven entirely by the test.
///
/// The test holds the engine side of every channel through
/// [`EngineControl`]: it decides when the engine is ready, what gets
/// committed, and whether the engine fails.
pub struct ScriptedEngine {
    events: EngineEvents,
    io_tx: oneshot::Sender<EngineIo>,
}

/// The test's end of a [`ScriptedEngine`].
#[allow(dead_code)]
pub struct EngineControl {
    pub commits: Option<mpsc::Sender<CommitBatch>>,
    pub status: watch::Sender<EngineStatus>,
    io_rx: oneshot::Receiver<EngineIo>,
    fatal: Option<oneshot::Sender<FatalSignal>>,
    ready: Option<oneshot::Sender<EngineReady>>,
}

impl ReplicationEngine for ScriptedEngine {
    fn start(self, io: EngineIo) -> EngineEvents {
        let _ = self.io_tx.send(io);
        self.events
    }
}

/// Create a scripted engine and its controls.
pub fn scripted_engine(commit_capacity: usize) -> (ScriptedEngine, EngineControl) {
    let (senders, events) = event_channels(1, commit_capacity);
    let (io_tx, io_rx) = oneshot::channel();
    let EngineSenders {
        commits,
        fatal,
        ready,
        status,
    } = senders;

    let control = EngineControl {
        commits: Some(commits),
        status,
        io_rx,
        fatal: Some(fatal),
        ready: Some(ready),
    };

    (ScriptedEngine { events, io_tx }, control)
}

#[allow(dead_code)]
impl EngineControl {
    /// Complete the readiness handshake.
    pub fn ready(&mut self, commit_index: LogIndex) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(EngineReady { commit_index });
        }
    }

    /// Fire the fatal signal.
    pub fn fail(&mut self, reason: &str) {
        if let Some(tx) = self.fatal.take() {
            let _ = tx.send(FatalSignal::new(reason));
        }
    }

    /// Deliver a commit batch, waiting for queue space.
    pub async fn commit(&self, batch: CommitBatch) {
        self.commits
            .as_ref()
            .expect("engine already closed")
            .send(batch)
            .await
            .expect("commit queue closed");
    }

    /// Try to deliver a commit batch; the queue may already be closed.
    pub async fn try_commit(&self, batch: CommitBatch) -> bool {
        match &self.commits {
            Some(commits) => commits.send(batch).await.is_ok(),
            None => false,
        }
    }

    /// Close the commit queue and drop every other engine-side channel.
    pub fn close(&mut self) {
        self.commits = None;
        self.fatal = None;
        self.ready = None;
    }

    /// The queues the node handed to the engine. Available once the node
    /// has called `start`.
    pub fn take_io(&mut self) -> EngineIo {
        self.io_rx.try_recv().expect("engine not started")
    }
}

/// A put entry at `index`.
pub fn put(index: LogIndex, key: &str, value: &str) -> LogEntry {
    LogEntry::normal(
        index,
        KvCommand::put(key, value).to_proposal().expect("encode"),
    )
}

/// A node configuration rooted at `dir` with small thresholds.
pub fn test_config(dir: &Path) -> NodeConfig {
    NodeConfig::builder()
        .node_id(1)
        .data_dir(dir)
        .snapshot_threshold(1_000)
        .snapshot_interval_ms(60_000)
        .commit_capacity(16)
        .build()
        .expect("Invalid config")
}

/// Start a node on a scripted engine that reports `commit_index` as ready.
pub async fn start_scripted(
    config: NodeConfig,
    commit_index: LogIndex,
) -> Result<(ClusterNode, NodeHandle, EngineControl), ClusterError> {
    let (engine, mut control) = scripted_engine(config.queues.commit_capacity);
    control.ready(commit_index);
    let (node, handle) = ClusterNode::start(config, engine).await?;
    Ok((node, handle, control))
}

/// Poll `condition` until it holds or `timeout_ms` passes.
pub async fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}
