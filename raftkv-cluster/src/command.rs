//! Key-value commands carried inside proposals.
//!
//! A proposal is opaque to the engine; this module fixes how the key-value
//! store encodes its mutations into proposal bytes and decodes them again
//! when they come back committed.

use crate::error::ClusterResult;
use crate::types::Proposal;
use serde::{Deserialize, Serialize};

/// Mutations of the replicated key-value map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvCommand {
    /// Set `key` to `value`, replacing any previous value.
    Put {
        /// Key to write.
        key: String,
        /// New value.
        value: String,
    },
}

impl KvCommand {
    /// Shorthand for [`KvCommand::Put`].
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        KvCommand::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get a human-readable name for this command type.
    pub fn name(&self) -> &'static str {
        match self {
            KvCommand::Put { .. } => "Put",
        }
    }

    /// Encode into a proposal.
    pub fn to_proposal(&self) -> ClusterResult<Proposal> {
        Ok(Proposal::new(serde_json::to_vec(self)?))
    }

    /// Decode from proposal bytes.
    pub fn from_bytes(data: &[u8]) -> ClusterResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
