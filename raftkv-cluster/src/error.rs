//! Error types for cluster operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The snapshot directory holds no snapshot files.
    ///
    /// Callers treat this as "start from empty state", not as a failure.
    #[error("No snapshot available")]
    NoSnapshotAvailable,

    /// The log directory holds no validly named segment files.
    #[error("No log segments found")]
    NoSegmentsFound,

    /// A file name does not follow the segment or snapshot naming scheme.
    #[error("Malformed file name: {0}")]
    MalformedName(String),

    /// Snapshot files exist but none of them could be decoded.
    #[error("Corrupt snapshot {name}: {cause}")]
    CorruptSnapshot {
        /// File name of the offending snapshot.
        name: String,
        /// Reason the snapshot was rejected.
        cause: String,
    },

    /// A segment file contains an undecodable record before its tail.
    #[error("Corrupt segment {path} at line {line}: {cause}")]
    CorruptSegment {
        /// Path of the segment file.
        path: PathBuf,
        /// 1-based line number of the bad record.
        line: usize,
        /// Reason the record was rejected.
        cause: String,
    },

    /// The log needed to continue from the recovered state is not on disk.
    #[error("No log segment covers index {index}")]
    MissingSegment {
        /// First index that could not be located.
        index: u64,
    },

    /// A committed entry arrived out of order.
    #[error("Out of order entry: expected index {expected}, got {got}")]
    OutOfOrder {
        /// The index the applier expected next.
        expected: u64,
        /// The index that arrived.
        got: u64,
    },

    /// The replication engine reported an unrecoverable failure.
    #[error("Replication engine failed: {0}")]
    Fatal(String),

    /// The replication engine went away before it could answer.
    #[error("Replication engine closed")]
    EngineClosed,

    /// The node is shutting down and no longer accepts work.
    #[error("Node is shutting down, request rejected")]
    ShuttingDown,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}
