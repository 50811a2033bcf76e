//! File naming and discovery for log segments and snapshots.
//!
//! Segment names are `{sequence:016x}-{first_index:016x}.wal`. Both fields
//! are fixed-width lowercase hex so that sorting names as strings sorts them
//! numerically, which makes the directory listing itself the index of the
//! log: no separate metadata file is kept.
//!
//! Snapshot names only need to be lexically sortable with the newest
//! snapshot sorting last. Snapshots written by [`SnapshotStore`] use
//! `{sequence:016x}-{index:016x}.snap`, where `index` is the last log
//! index the snapshot covers.
//!
//! [`SnapshotStore`]: super::SnapshotStore

use crate::error::{ClusterError, ClusterResult};
use crate::types::LogIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Suffix of log segment files.
pub const SEGMENT_SUFFIX: &str = ".wal";

/// Suffix of snapshot files.
pub const SNAPSHOT_SUFFIX: &str = ".snap";

/// Width of each hex field in a file name.
const HEX_WIDTH: usize = 16;

/// A segment discovered in the log directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// File name within the log directory.
    pub name: String,
    /// Creation sequence number.
    pub sequence: u64,
    /// Lowest log index the segment may contain.
    pub index: LogIndex,
}

/// Name of a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotName(String);

impl SnapshotName {
    /// Wrap an existing file name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The file name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number and covered index, for names this crate generated.
    pub fn parts(&self) -> Option<(u64, LogIndex)> {
        self.0
            .strip_suffix(SNAPSHOT_SUFFIX)
            .and_then(parse_hex_pair)
    }

    /// Last log index this snapshot covers, for names this crate generated.
    pub fn covered_index(&self) -> Option<LogIndex> {
        self.parts().map(|(_, index)| index)
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a segment file name.
pub fn build_segment_name(sequence: u64, index: LogIndex) -> String {
    format!("{:016x}-{:016x}{}", sequence, index, SEGMENT_SUFFIX)
}

/// Parse `(sequence, first_index)` out of a segment file name.
pub fn parse_segment_name(name: &str) -> ClusterResult<(u64, LogIndex)> {
    name.strip_suffix(SEGMENT_SUFFIX)
        .and_then(parse_hex_pair)
        .ok_or_else(|| ClusterError::MalformedName(name.to_string()))
}

/// Generate a snapshot file name.
pub fn build_snapshot_name(sequence: u64, index: LogIndex) -> SnapshotName {
    SnapshotName(format!("{:016x}-{:016x}{}", sequence, index, SNAPSHOT_SUFFIX))
}

/// Parse `AAAAAAAAAAAAAAAA-BBBBBBBBBBBBBBBB` with lowercase hex digits only,
/// so that every accepted name has exactly one spelling.
fn parse_hex_pair(stem: &str) -> Option<(u64, u64)> {
    let (high, low) = stem.split_once('-')?;
    Some((parse_hex_field(high)?, parse_hex_field(low)?))
}

fn parse_hex_field(field: &str) -> Option<u64> {
    let well_formed = field.len() == HEX_WIDTH
        && field
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return None;
    }
    u64::from_str_radix(field, 16).ok()
}

/// List snapshot files, newest first.
///
/// Returns [`ClusterError::NoSnapshotAvailable`] when the directory holds
/// no `.snap` file. Failing to read the directory is an I/O error.
pub fn list_snapshots(dir: &Path) -> ClusterResult<Vec<SnapshotName>> {
    let mut snaps = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(SNAPSHOT_SUFFIX) {
                snaps.push(SnapshotName::new(name));
            }
        }
    }

    if snaps.is_empty() {
        return Err(ClusterError::NoSnapshotAvailable);
    }

    snaps.sort_by(|a, b| b.cmp(a));
    Ok(snaps)
}

/// List validly named segment files in ascending `(sequence, index)` order.
///
/// Files that do not parse as segment names are skipped. Returns
/// [`ClusterError::NoSegmentsFound`] when nothing valid remains.
pub fn list_segments(dir: &Path) -> ClusterResult<Vec<CatalogEntry>> {
    let mut segments = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };

        match parse_segment_name(&name) {
            Ok((sequence, index)) => segments.push(CatalogEntry {
                name,
                sequence,
                index,
            }),
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "ignoring non-segment file");
            }
        }
    }

    if segments.is_empty() {
        return Err(ClusterError::NoSegmentsFound);
    }

    segments.sort_by_key(|s| (s.sequence, s.index));
    Ok(segments)
}

/// Find the segment a replay of `index` must start from.
///
/// `entries` must be sorted ascending. Scans from the newest segment
/// backwards and returns the position of the first one whose first index
/// is `<= index`. Returns `None` when `index` precedes every segment.
pub fn find_segment_for_index(entries: &[CatalogEntry], index: LogIndex) -> Option<usize> {
    entries.iter().rposition(|entry| entry.index <= index)
}

/// Number of leading segments whose entries are all `<= index`.
///
/// A segment is covered when the next segment starts at or before
/// `index + 1`. The newest segment is never counted because its end is
/// unknown and the engine may still be appending to it.
pub fn covered_segments(entries: &[CatalogEntry], index: LogIndex) -> usize {
    entries
        .windows(2)
        .take_while(|pair| pair[1].index <= index.saturating_add(1))
        .count()
}
