//! Key-value state machine.
//!
//! The state machine receives committed log entries and applies them to the
//! key-value map. Every replica applies the same entries in the same order
//! and therefore ends up with the same map, and the same snapshot bytes.

mod apply;
mod machine;

pub use machine::{ApplyReport, KvState, KvStateMachine};
