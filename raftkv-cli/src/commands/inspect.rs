//! Inspect command - list the segments and snapshots in a data directory.

use anyhow::{Context, Result};
use raftkv_cluster::config::{SNAP_DIR, WAL_DIR};
use raftkv_cluster::storage::{self, SnapshotStore};
use raftkv_cluster::ClusterError;
use serde::Serialize;
use std::path::Path;

/// One log segment.
#[derive(Debug, Serialize)]
pub struct SegmentReport {
    pub name: String,
    pub sequence: u64,
    pub first_index: u64,
    pub entries: usize,
    pub last_index: Option<u64>,
    pub torn_tail: bool,
    pub error: Option<String>,
}

/// One snapshot file.
#[derive(Debug, Serialize)]
pub struct SnapshotReport {
    pub name: String,
    pub covered_index: Option<u64>,
    pub bytes: Option<usize>,
    pub error: Option<String>,
}

/// Everything found in a data directory.
#[derive(Debug, Serialize)]
pub struct DirectoryReport {
    pub segments: Vec<SegmentReport>,
    /// Newest first.
    pub snapshots: Vec<SnapshotReport>,
}

/// Run the inspect command.
pub fn run(data_dir: &Path, json: bool) -> Result<()> {
    tracing::info!(data_dir = %data_dir.display(), "Inspecting data directory");

    let report = collect(data_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Log Segments ({})", data_dir.join(WAL_DIR).display());
    println!("============");
    if report.segments.is_empty() {
        println!("  (none)");
    }
    for segment in &report.segments {
        let range = match segment.last_index {
            Some(last) => format!("{}..={}", segment.first_index, last),
            None => format!("{}.. (empty)", segment.first_index),
        };
        let mut notes = String::new();
        if segment.torn_tail {
            notes.push_str("  [torn tail]");
        }
        if let Some(error) = &segment.error {
            notes.push_str(&format!("  [error: {error}]"));
        }
        println!(
            "  {}  seq={:<4} entries={:<6} {}{}",
            segment.name, segment.sequence, segment.entries, range, notes
        );
    }
    println!();

    println!("Snapshots ({})", data_dir.join(SNAP_DIR).display());
    println!("=========");
    if report.snapshots.is_empty() {
        println!("  (none)");
    }
    for snapshot in &report.snapshots {
        let covered = snapshot
            .covered_index
            .map_or_else(|| "?".to_string(), |i| i.to_string());
        match (&snapshot.bytes, &snapshot.error) {
            (Some(bytes), _) => {
                println!("  {}  covers={}  {} bytes", snapshot.name, covered, bytes)
            }
            (None, Some(error)) => {
                println!("  {}  covers={}  [invalid: {}]", snapshot.name, covered, error)
            }
            (None, None) => println!("  {}  covers={}", snapshot.name, covered),
        }
    }

    Ok(())
}

/// Read the directory without modifying it.
pub fn collect(data_dir: &Path) -> Result<DirectoryReport> {
    if !data_dir.is_dir() {
        anyhow::bail!("Data directory not found: {}", data_dir.display());
    }

    let wal_dir = data_dir.join(WAL_DIR);
    let mut segments = Vec::new();
    if wal_dir.is_dir() {
        let entries = match storage::list_segments(&wal_dir) {
            Ok(entries) => entries,
            Err(ClusterError::NoSegmentsFound) => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", wal_dir.display()));
            }
        };

        for entry in entries {
            let mut report = SegmentReport {
                name: entry.name.clone(),
                sequence: entry.sequence,
                first_index: entry.index,
                entries: 0,
                last_index: None,
                torn_tail: false,
                error: None,
            };
            match storage::read_segment(&wal_dir.join(&entry.name)) {
                Ok(contents) => {
                    report.entries = contents.entries.len();
                    report.last_index = contents.entries.last().map(|e| e.index);
                    report.torn_tail = contents.torn_tail;
                }
                Err(e) => report.error = Some(e.to_string()),
            }
            segments.push(report);
        }
    }

    let snap_dir = data_dir.join(SNAP_DIR);
    let mut snapshots = Vec::new();
    if snap_dir.is_dir() {
        let names = match storage::list_snapshots(&snap_dir) {
            Ok(names) => names,
            Err(ClusterError::NoSnapshotAvailable) => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", snap_dir.display()));
            }
        };

        let store = SnapshotStore::open(&snap_dir, names.len().max(1))?;
        for name in names {
            let (bytes, error) = match store.load(&name) {
                Ok(data) => (Some(data.len()), None),
                Err(e) => (None, Some(e.to_string())),
            };
            snapshots.push(SnapshotReport {
                covered_index: name.covered_index(),
                name: name.to_string(),
                bytes,
                error,
            });
        }
    }

    Ok(DirectoryReport {
        segments,
        snapshots,
    })
}
