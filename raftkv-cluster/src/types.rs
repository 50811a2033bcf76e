//! Values exchanged between the node and the replication engine.
//!
//! Everything the engine persists in log segments and hands back in commit
//! batches is defined here, so the on-disk record format and the in-memory
//! queue format are the same type.

use crate::storage::SnapshotName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node ID type for the cluster.
///
/// Each node in the cluster has a unique 64-bit identifier.
pub type ClusterNodeId = u64;

/// Position of an entry in the replicated log. Index 0 means "nothing".
pub type LogIndex = u64;

/// An opaque client mutation submitted for replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proposal(Vec<u8>);

impl Proposal {
    /// Wrap raw payload bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    /// Payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Proposal {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

/// Kind of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// Add a node to the cluster.
    Add,
    /// Remove a node from the cluster.
    Remove,
}

/// A request to alter cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    /// Add or remove.
    pub change_type: ChangeType,
    /// The node being added or removed.
    pub node_id: ClusterNodeId,
    /// Opaque context, e.g. the peer URL of a joining node.
    #[serde(default)]
    pub context: Vec<u8>,
}

impl MembershipChange {
    /// Request that `node_id` join the cluster.
    pub fn add(node_id: ClusterNodeId, context: impl Into<Vec<u8>>) -> Self {
        Self {
            change_type: ChangeType::Add,
            node_id,
            context: context.into(),
        }
    }

    /// Request that `node_id` leave the cluster.
    pub fn remove(node_id: ClusterNodeId) -> Self {
        Self {
            change_type: ChangeType::Remove,
            node_id,
            context: Vec::new(),
        }
    }
}

/// Payload of a replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// No-op entry, e.g. appended by a new leader.
    Blank,
    /// A client proposal.
    Normal(Proposal),
    /// A committed membership change.
    Membership(MembershipChange),
}

/// One replicated log entry, as stored in a segment line and delivered in a
/// commit batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log index of this entry.
    pub index: LogIndex,
    /// Entry content.
    pub payload: EntryPayload,
}

impl LogEntry {
    /// A normal entry carrying a client proposal.
    pub fn normal(index: LogIndex, proposal: Proposal) -> Self {
        Self {
            index,
            payload: EntryPayload::Normal(proposal),
        }
    }
}

/// An ordered group of entries the engine has agreed on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    /// Entries in log order.
    pub entries: Vec<LogEntry>,
    /// Snapshot to load before applying `entries`.
    pub snapshot_marker: Option<SnapshotName>,
}

impl CommitBatch {
    /// A batch of entries with no snapshot marker.
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            snapshot_marker: None,
        }
    }

    /// A batch that asks the applier to load `snapshot` first.
    pub fn with_snapshot(snapshot: SnapshotName, entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            snapshot_marker: Some(snapshot),
        }
    }

    /// Index of the last entry, if any.
    pub fn last_index(&self) -> Option<LogIndex> {
        self.entries.last().map(|e| e.index)
    }
}

/// Terminal failure reported by the replication engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalSignal {
    /// What went wrong.
    pub reason: String,
}

impl FatalSignal {
    /// Create a fatal signal.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FatalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}
