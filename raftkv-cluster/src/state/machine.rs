//! The replicated key-value state machine.

use crate::engine::SnapshotSource;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{LogEntry, LogIndex};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::apply::{EntryOutcome, apply_entry};

/// The key-value state that gets replicated.
///
/// `data` is a `BTreeMap` so that serializing equal states yields
/// byte-identical snapshots.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvState {
    /// Index of the last entry reflected in `data`.
    pub applied_index: LogIndex,
    /// The key-value map.
    pub data: BTreeMap<String, String>,
}

/// Counters for one call to [`KvStateMachine::apply`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Entries that advanced the applied index.
    pub applied: usize,
    /// Redelivered entries at or below the applied index, dropped.
    pub duplicates: usize,
    /// Entries whose payload failed to decode (counted in `applied` too).
    pub malformed: usize,
}

/// The state machine.
///
/// Only the node's commit loop mutates it. Lookups from any number of
/// client tasks take the read lock and therefore observe the state between
/// two batches, never in the middle of one.
#[derive(Debug, Default)]
pub struct KvStateMachine {
    /// The replicated state.
    state: RwLock<KvState>,
}

impl KvStateMachine {
    /// Create an empty state machine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply committed entries in order.
    ///
    /// Entries at or below the applied index are duplicates from an
    /// at-least-once redelivery and are dropped. An entry that skips ahead
    /// of the next expected index stops the batch with
    /// [`ClusterError::OutOfOrder`]; entries before it stay applied.
    pub fn apply(&self, entries: &[LogEntry]) -> ClusterResult<ApplyReport> {
        let mut report = ApplyReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let mut state = self.state.write();

        for entry in entries {
            tracing::debug!(index = entry.index, "applying to state machine");

            let expected = state.applied_index + 1;
            if entry.index < expected {
                report.duplicates += 1;
                continue;
            }
            if entry.index > expected {
                return Err(ClusterError::OutOfOrder {
                    expected,
                    got: entry.index,
                });
            }

            if apply_entry(&mut state, entry) == EntryOutcome::Malformed {
                report.malformed += 1;
            }
            report.applied += 1;
        }

        if report.duplicates > 0 {
            tracing::debug!(
                duplicates = report.duplicates,
                applied_index = state.applied_index,
                "dropped redelivered entries"
            );
        }

        Ok(report)
    }

    /// Serialize the full state.
    pub fn snapshot(&self) -> ClusterResult<Vec<u8>> {
        self.snapshot_at().map(|(_, data)| data)
    }

    /// Serialize the full state together with the index it reflects.
    pub fn snapshot_at(&self) -> ClusterResult<(LogIndex, Vec<u8>)> {
        let state = self.state.read();
        let data = serde_json::to_vec(&*state)?;
        Ok((state.applied_index, data))
    }

    /// Replace the whole state with a snapshot produced by [`snapshot`].
    ///
    /// [`snapshot`]: KvStateMachine::snapshot
    pub fn restore(&self, data: &[u8]) -> ClusterResult<()> {
        let new_state: KvState = serde_json::from_slice(data)?;

        tracing::info!(
            applied_index = new_state.applied_index,
            keys = new_state.data.len(),
            "restoring state machine from snapshot"
        );

        *self.state.write() = new_state;
        Ok(())
    }

    /// Look up the value of `key`.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.state.read().data.get(key).cloned()
    }

    /// Index of the last applied entry.
    pub fn applied_index(&self) -> LogIndex {
        self.state.read().applied_index
    }

    /// Get a read-only view of the current state.
    ///
    /// The guard blocks the commit loop while held; keep it short.
    pub fn state(&self) -> RwLockReadGuard<'_, KvState> {
        self.state.read()
    }
}

impl SnapshotSource for KvStateMachine {
    fn produce_snapshot(&self) -> ClusterResult<Vec<u8>> {
        self.snapshot()
    }
}
