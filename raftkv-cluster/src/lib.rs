//! Replicated key-value store coordination layer.
//!
//! This crate glues a client-facing key-value API to an opaque log
//! replication engine. It owns the on-disk layout used to rebuild state after
//! a restart (log segments and snapshots), and the asynchronous plumbing that
//! moves proposals into the engine and committed entries back out to the
//! state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ClusterNode                          │
//! │                                                              │
//! │  NodeHandle ──proposals──►┌────────────┐                     │
//! │             ──membership─►│   Engine   │──commits──┐         │
//! │                           └─────┬──────┘           ▼         │
//! │                                 │            ┌────────────┐  │
//! │                            wal/*.wal         │ commit loop│  │
//! │                                              └─────┬──────┘  │
//! │  NodeHandle ◄──lookup── KvStateMachine ◄──apply────┘         │
//! │                              │                               │
//! │                              └──snapshot──► snap/*.snap      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use raftkv_cluster::{ClusterNode, LoopbackEngine, NodeConfig};
//!
//! let config = NodeConfig::builder()
//!     .node_id(1)
//!     .data_dir("/var/lib/raftkv")
//!     .build()?;
//!
//! let engine = LoopbackEngine::new(&config);
//! let (node, handle) = ClusterNode::start(config, engine).await?;
//!
//! handle.put("x", "1").await?;
//! let value = handle.lookup("x");
//!
//! node.stop().await?;
//! ```

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod node;
pub mod state;
pub mod storage;
pub mod types;

// Re-export main types
pub use command::KvCommand;
pub use config::NodeConfig;
pub use engine::{EngineStatus, LoopbackEngine, ReplicationEngine};
pub use error::{ClusterError, ClusterResult};
pub use node::{ClusterNode, NodeHandle, NodeState, NodeStatus, ShutdownReason};
pub use state::KvStateMachine;
pub use types::{ClusterNodeId, CommitBatch, LogEntry, LogIndex, MembershipChange, Proposal};
