//! On-disk layout: log segments and snapshots.
//!
//! ## Storage Layout
//!
//! ```text
//! data_dir/
//! ├── wal/
//! │   ├── 0000000000000000-0000000000000001.wal   # Entries 1..=1000 (closed)
//! │   ├── 0000000000000001-00000000000003e9.wal   # Entries 1001..=2000 (closed)
//! │   └── 0000000000000002-00000000000007d1.wal   # Entries 2001.. (active)
//! └── snap/
//!     ├── 0000000000000004-00000000000005dc.snap  # Covers entries ..=1500
//!     └── 0000000000000005-0000000000000800.snap  # Covers entries ..=2048
//! ```
//!
//! Segment files use newline-delimited JSON (NDJSON) for human-readability
//! and easy debugging.

pub mod catalog;
mod segment;
mod snapshot;

pub use catalog::{
    CatalogEntry, SEGMENT_SUFFIX, SNAPSHOT_SUFFIX, SnapshotName, build_segment_name,
    find_segment_for_index, list_segments, list_snapshots, parse_segment_name,
};
pub use segment::{SegmentContents, SegmentWriter, compact_segments, read_segment};
pub use snapshot::SnapshotStore;
