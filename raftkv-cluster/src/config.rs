//! Node configuration.

use crate::types::ClusterNodeId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Subdirectory of `data_dir` holding log segments.
pub const WAL_DIR: &str = "wal";

/// Subdirectory of `data_dir` holding snapshots.
pub const SNAP_DIR: &str = "snap";

/// Configuration for a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's unique ID in the cluster (1-based).
    pub node_id: ClusterNodeId,

    /// Root directory for log segments and snapshots.
    pub data_dir: PathBuf,

    /// Snapshot configuration.
    pub snapshot: SnapshotConfig,

    /// Queue sizing between the node and the engine.
    pub queues: QueueConfig,

    /// Entries per segment file before the loopback engine rotates.
    pub segment_max_entries: usize,
}

/// Snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Create a snapshot after this many applied entries.
    pub entry_threshold: u64,

    /// Create a snapshot after this many milliseconds if anything was applied.
    pub interval_ms: u64,

    /// Number of snapshot files to keep on disk.
    pub retention_count: usize,
}

/// Capacities of the bounded queues.
///
/// A full queue blocks the producer; it never drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Client proposals waiting for the engine.
    pub proposal_capacity: usize,

    /// Membership changes waiting for the engine.
    pub membership_capacity: usize,

    /// Commit batches waiting for the applier.
    pub commit_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            data_dir: PathBuf::from("./raftkv-data"),
            snapshot: SnapshotConfig::default(),
            queues: QueueConfig::default(),
            segment_max_entries: 1_000,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            // Snapshot every 10000 entries
            entry_threshold: 10_000,
            // or every 5 minutes
            interval_ms: 300_000,
            retention_count: 3,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            proposal_capacity: 1,
            membership_capacity: 1,
            commit_capacity: 64,
        }
    }
}

impl NodeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// Directory holding this node's log segments.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join(WAL_DIR)
    }

    /// Directory holding this node's snapshots.
    pub fn snap_dir(&self) -> PathBuf {
        self.data_dir.join(SNAP_DIR)
    }

    /// Get the time-based snapshot interval as a Duration.
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot.interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id == 0 {
            return Err("node_id must be > 0".to_string());
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir is required".to_string());
        }

        if self.snapshot.entry_threshold == 0 {
            return Err("snapshot.entry_threshold must be > 0".to_string());
        }

        if self.snapshot.interval_ms == 0 {
            return Err("snapshot.interval_ms must be > 0".to_string());
        }

        if self.snapshot.retention_count == 0 {
            return Err("snapshot.retention_count must be > 0".to_string());
        }

        // tokio bounded channels panic on zero capacity
        let queues = &self.queues;
        if queues.proposal_capacity == 0
            || queues.membership_capacity == 0
            || queues.commit_capacity == 0
        {
            return Err("queue capacities must be > 0".to_string());
        }

        if self.segment_max_entries == 0 {
            return Err("segment_max_entries must be > 0".to_string());
        }

        Ok(())
    }
}

/// Builder for NodeConfig.
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the node ID.
    pub fn node_id(mut self, id: ClusterNodeId) -> Self {
        self.config.node_id = id;
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the entry-count snapshot trigger.
    pub fn snapshot_threshold(mut self, entries: u64) -> Self {
        self.config.snapshot.entry_threshold = entries;
        self
    }

    /// Set the time-based snapshot trigger in milliseconds.
    pub fn snapshot_interval_ms(mut self, ms: u64) -> Self {
        self.config.snapshot.interval_ms = ms;
        self
    }

    /// Set how many snapshots are kept on disk.
    pub fn snapshot_retention(mut self, count: usize) -> Self {
        self.config.snapshot.retention_count = count;
        self
    }

    /// Set the proposal queue capacity.
    pub fn proposal_capacity(mut self, capacity: usize) -> Self {
        self.config.queues.proposal_capacity = capacity;
        self
    }

    /// Set the commit queue capacity.
    pub fn commit_capacity(mut self, capacity: usize) -> Self {
        self.config.queues.commit_capacity = capacity;
        self
    }

    /// Set the segment rotation size.
    pub fn segment_max_entries(mut self, entries: usize) -> Self {
        self.config.segment_max_entries = entries;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<NodeConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}
