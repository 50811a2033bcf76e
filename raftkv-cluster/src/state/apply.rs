//! Entry application logic.

use crate::command::KvCommand;
use crate::types::{EntryPayload, LogEntry};

use super::machine::KvState;

/// What happened to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EntryOutcome {
    /// The entry changed (or deliberately did not change) the state.
    Applied,
    /// The payload could not be decoded; the entry was skipped.
    Malformed,
}

/// Apply a single in-order entry to the state.
///
/// The caller has already checked that `entry.index` is the next index.
/// A payload that does not decode is skipped rather than failing the batch:
/// the entry is already agreed on, and every replica skips it the same way.
pub(super) fn apply_entry(state: &mut KvState, entry: &LogEntry) -> EntryOutcome {
    let outcome = match &entry.payload {
        EntryPayload::Blank => EntryOutcome::Applied,
        EntryPayload::Membership(change) => {
            tracing::debug!(
                index = entry.index,
                node_id = change.node_id,
                change = ?change.change_type,
                "membership change committed"
            );
            EntryOutcome::Applied
        }
        EntryPayload::Normal(proposal) => match KvCommand::from_bytes(proposal.as_bytes()) {
            Ok(cmd) => {
                tracing::trace!(index = entry.index, command = cmd.name(), "applying command");
                apply_command(state, cmd);
                EntryOutcome::Applied
            }
            Err(e) => {
                tracing::warn!(index = entry.index, error = %e, "skipping malformed entry");
                EntryOutcome::Malformed
            }
        },
    };

    state.applied_index = entry.index;
    outcome
}

/// Apply a command to the key-value state.
fn apply_command(state: &mut KvState, cmd: KvCommand) {
    match cmd {
        KvCommand::Put { key, value } => {
            state.data.insert(key, value);
        }
    }
}
