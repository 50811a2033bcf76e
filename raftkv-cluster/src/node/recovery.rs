//! Startup recovery: newest valid snapshot plus the log suffix after it.

use crate::error::{ClusterError, ClusterResult};
use crate::state::KvStateMachine;
use crate::storage::{
    SnapshotName, SnapshotStore, find_segment_for_index, list_segments, read_segment,
};
use crate::types::LogIndex;
use serde::Serialize;
use std::path::Path;

/// What recovery found and applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Snapshot the state was restored from, if any.
    pub snapshot: Option<SnapshotName>,
    /// Applied index right after the snapshot was restored.
    pub snapshot_index: LogIndex,
    /// Log entries replayed on top of the snapshot.
    pub replayed: usize,
    /// Applied index after recovery.
    pub applied_index: LogIndex,
}

/// Rebuild `machine` from the snapshot store and the log segments in
/// `wal_dir`, replaying up to and including `commit_index`. Without a
/// store the replay starts from an empty state.
///
/// Entries past `commit_index` are on disk but not yet agreed on and are
/// left for the engine to deliver. A missing segment, a gap in the log or
/// a corrupt record anywhere but the tail of the newest segment is an
/// error; the node must not start from a state it cannot vouch for.
pub fn recover(
    store: Option<&SnapshotStore>,
    wal_dir: &Path,
    machine: &KvStateMachine,
    commit_index: LogIndex,
) -> ClusterResult<RecoveryReport> {
    let mut report = RecoveryReport::default();

    let latest = match store {
        Some(store) => store.load_latest(),
        None => Err(ClusterError::NoSnapshotAvailable),
    };
    match latest {
        Ok((data, name)) => {
            machine.restore(&data)?;
            tracing::info!(
                snapshot = %name,
                applied_index = machine.applied_index(),
                "Loaded snapshot"
            );
            report.snapshot = Some(name);
        }
        Err(ClusterError::NoSnapshotAvailable) => {
            tracing::info!("No snapshot found, starting from empty state");
        }
        Err(e) => return Err(e),
    }

    report.snapshot_index = machine.applied_index();
    report.applied_index = report.snapshot_index;

    if report.applied_index >= commit_index {
        return Ok(report);
    }

    let start = report.applied_index + 1;
    let missing = || ClusterError::MissingSegment {
        index: machine.applied_index() + 1,
    };

    let segments = if wal_dir.is_dir() {
        match list_segments(wal_dir) {
            Ok(segments) => segments,
            Err(ClusterError::NoSegmentsFound) => return Err(missing()),
            Err(e) => return Err(e),
        }
    } else {
        return Err(missing());
    };

    let first = find_segment_for_index(&segments, start).ok_or_else(missing)?;
    let newest = segments.len() - 1;

    for (pos, segment) in segments.iter().enumerate().skip(first) {
        let path = wal_dir.join(&segment.name);
        let contents = read_segment(&path)?;

        if contents.torn_tail && pos != newest {
            return Err(ClusterError::CorruptSegment {
                path,
                line: contents.entries.len() + 1,
                cause: "torn record in a closed segment".to_string(),
            });
        }

        let applied = machine.applied_index();
        let pending: Vec<_> = contents
            .entries
            .into_iter()
            .filter(|e| e.index > applied && e.index <= commit_index)
            .collect();

        if !pending.is_empty() {
            let applied = machine.apply(&pending)?.applied;
            report.replayed += applied;
            tracing::debug!(
                segment = %segment.name,
                entries = applied,
                "Replayed segment"
            );
        }

        if machine.applied_index() >= commit_index {
            break;
        }
    }

    report.applied_index = machine.applied_index();
    if report.applied_index < commit_index {
        return Err(missing());
    }

    tracing::info!(
        snapshot_index = report.snapshot_index,
        replayed = report.replayed,
        applied_index = report.applied_index,
        "Recovery complete"
    );

    Ok(report)
}

/// Highest index present in the log segments of `wal_dir`, 0 when empty.
///
/// Used by offline tools that have no engine to ask for a commit index.
pub fn last_logged_index(wal_dir: &Path) -> ClusterResult<LogIndex> {
    if !wal_dir.is_dir() {
        return Ok(0);
    }

    let segments = match list_segments(wal_dir) {
        Ok(segments) => segments,
        Err(ClusterError::NoSegmentsFound) => return Ok(0),
        Err(e) => return Err(e),
    };

    for segment in segments.iter().rev() {
        let contents = read_segment(&wal_dir.join(&segment.name))?;
        if let Some(last) = contents.entries.last() {
            return Ok(last.index);
        }
    }

    Ok(0)
}
