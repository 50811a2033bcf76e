//! Snapshot persistence.
//!
//! Handles saving, loading, and cleaning up state machine snapshots. A
//! snapshot is written to a temporary file, fsynced, and renamed into
//! place, so a reader never observes a partially written snapshot.
//!
//! ## File Format
//!
//! ```text
//! ┌─────────┬─────────┬──────────┬─────────┐
//! │ Magic   │ Version │ Length   │ Payload │
//! │ (4 B)   │ (4 B)   │ (8 B LE) │ (var)   │
//! └─────────┴─────────┴──────────┴─────────┘
//! ```

use crate::error::{ClusterError, ClusterResult};
use crate::types::LogIndex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::catalog::{self, SnapshotName};

/// Snapshot file format version.
const SNAPSHOT_VERSION: u32 = 1;
/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"RKVS";
/// Size of the fixed header.
const HEADER_LEN: usize = 4 + 4 + 8;

/// Reads and writes snapshot files in one directory.
pub struct SnapshotStore {
    /// Directory for snapshot files.
    directory: PathBuf,
    /// Number of snapshots to retain.
    retention_count: usize,
    /// Sequence number for the next snapshot name.
    next_sequence: AtomicU64,
}

impl SnapshotStore {
    /// Open a snapshot directory, creating it if needed.
    pub fn open(directory: impl Into<PathBuf>, retention_count: usize) -> ClusterResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let next_sequence = Self::find_next_sequence(&directory)?;

        Ok(Self {
            directory,
            retention_count: retention_count.max(1),
            next_sequence: AtomicU64::new(next_sequence),
        })
    }

    /// Find the next sequence number by examining existing files.
    fn find_next_sequence(directory: &Path) -> ClusterResult<u64> {
        let names = match catalog::list_snapshots(directory) {
            Ok(names) => names,
            Err(ClusterError::NoSnapshotAvailable) => return Ok(1),
            Err(e) => return Err(e),
        };

        let max_sequence = names
            .iter()
            .filter_map(|name| name.parts())
            .map(|(sequence, _)| sequence)
            .max()
            .unwrap_or(0);

        Ok(max_sequence + 1)
    }

    /// Load the newest valid snapshot.
    ///
    /// Snapshots that fail validation are skipped in favour of older ones.
    /// Returns [`ClusterError::NoSnapshotAvailable`] for an empty directory
    /// and [`ClusterError::CorruptSnapshot`] when snapshots exist but none
    /// is valid. Read failures are returned as they happen.
    pub fn load_latest(&self) -> ClusterResult<(Vec<u8>, SnapshotName)> {
        let names = catalog::list_snapshots(&self.directory)?;
        let mut first_failure = None;

        for name in names {
            match self.load(&name) {
                Ok(data) => return Ok((data, name)),
                Err(e @ ClusterError::CorruptSnapshot { .. }) => {
                    tracing::warn!(
                        snapshot = %name,
                        error = %e,
                        "Failed to load snapshot, trying older one"
                    );
                    first_failure.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(first_failure.unwrap_or(ClusterError::NoSnapshotAvailable))
    }

    /// Load a specific snapshot.
    pub fn load(&self, name: &SnapshotName) -> ClusterResult<Vec<u8>> {
        let bytes = fs::read(self.directory.join(name.as_str()))?;
        decode(name, bytes)
    }

    /// Persist a snapshot covering the log up to `index`.
    ///
    /// Old snapshots beyond the retention count are removed afterwards.
    pub fn save(&self, index: LogIndex, data: &[u8]) -> ClusterResult<SnapshotName> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let name = catalog::build_snapshot_name(sequence, index);

        self.write_snapshot(&name, data)?;
        self.cleanup_old_snapshots();

        tracing::info!(
            snapshot = %name,
            index,
            bytes = data.len(),
            "Saved snapshot"
        );

        Ok(name)
    }

    /// Write a snapshot to disk.
    fn write_snapshot(&self, name: &SnapshotName, data: &[u8]) -> ClusterResult<()> {
        let path = self.directory.join(name.as_str());
        let temp_path = path.with_extension("snap.tmp");

        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        writer.write_all(&(data.len() as u64).to_le_bytes())?;
        writer.write_all(data)?;

        writer.flush()?;
        writer.get_ref().sync_all()?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Cleanup old snapshots beyond retention count.
    fn cleanup_old_snapshots(&self) {
        let snapshots = match catalog::list_snapshots(&self.directory) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list snapshots for cleanup");
                return;
            }
        };

        // Newest first, so everything past the retention count is old
        for name in snapshots.iter().skip(self.retention_count) {
            if let Err(e) = fs::remove_file(self.directory.join(name.as_str())) {
                tracing::warn!(snapshot = %name, error = %e, "Failed to remove old snapshot");
            } else {
                tracing::debug!(snapshot = %name, "Removed old snapshot");
            }
        }
    }

    /// Highest log index that every retained snapshot covers.
    ///
    /// Segments up to this index are never needed again, even if recovery
    /// has to fall back to the oldest retained snapshot. `None` when there
    /// are no snapshots or one of them has a foreign name.
    pub fn compaction_floor(&self) -> ClusterResult<Option<LogIndex>> {
        let names = match catalog::list_snapshots(&self.directory) {
            Ok(names) => names,
            Err(ClusterError::NoSnapshotAvailable) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(names
            .iter()
            .map(SnapshotName::covered_index)
            .try_fold(LogIndex::MAX, |floor, index| index.map(|i| floor.min(i))))
    }
}

fn decode(name: &SnapshotName, bytes: Vec<u8>) -> ClusterResult<Vec<u8>> {
    let corrupt = |cause: String| ClusterError::CorruptSnapshot {
        name: name.to_string(),
        cause,
    };

    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!("truncated header ({} bytes)", bytes.len())));
    }

    let (header, payload) = bytes.split_at(HEADER_LEN);
    if &header[0..4] != SNAPSHOT_MAGIC {
        return Err(corrupt("invalid snapshot magic".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&header[4..8]);
    let version = u32::from_le_bytes(version);
    if version != SNAPSHOT_VERSION {
        return Err(corrupt(format!("unsupported snapshot version: {}", version)));
    }

    let mut len = [0u8; 8];
    len.copy_from_slice(&header[8..16]);
    let len = u64::from_le_bytes(len);
    if len != payload.len() as u64 {
        return Err(corrupt(format!(
            "length mismatch: header says {} bytes, found {}",
            len,
            payload.len()
        )));
    }

    Ok(payload.to_vec())
}
