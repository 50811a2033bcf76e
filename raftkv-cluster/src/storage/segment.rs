//! Segment file operations.
//!
//! Each segment file holds newline-delimited JSON, one [`LogEntry`] per
//! line, in ascending index order. A crash in the middle of an append can
//! leave the last line of the newest segment incomplete; readers report
//! that as a torn tail instead of an error so the caller can decide whether
//! it is acceptable.

use crate::error::{ClusterError, ClusterResult};
use crate::types::{LogEntry, LogIndex};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write as IoWrite};
use std::path::{Path, PathBuf};

use super::catalog::{self, CatalogEntry};

/// Entries read out of one segment file.
#[derive(Debug, Default)]
pub struct SegmentContents {
    /// Decoded entries in file order.
    pub entries: Vec<LogEntry>,
    /// The final line could not be decoded.
    pub torn_tail: bool,
}

/// Read every entry of a segment file.
///
/// An undecodable line anywhere but at the very end is reported as
/// [`ClusterError::CorruptSegment`].
pub fn read_segment(path: &Path) -> ClusterResult<SegmentContents> {
    let data = fs::read(path)?;
    let lines: Vec<(usize, &[u8])> = data
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .collect();

    let mut contents = SegmentContents::default();
    let last = lines.len().saturating_sub(1);

    for (pos, (line_no, line)) in lines.iter().enumerate() {
        match serde_json::from_slice::<LogEntry>(line) {
            Ok(entry) => contents.entries.push(entry),
            Err(e) if pos == last => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "torn record at segment tail"
                );
                contents.torn_tail = true;
            }
            Err(e) => {
                return Err(ClusterError::CorruptSegment {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    cause: e.to_string(),
                });
            }
        }
    }

    Ok(contents)
}

/// Whether the file is empty or its last byte is a newline.
fn ends_with_newline(path: &Path) -> ClusterResult<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Delete segments fully covered by a snapshot at `index`.
///
/// Returns the names of the deleted segments. Deletion is best-effort: a
/// segment that cannot be removed is logged and left in place.
pub fn compact_segments(dir: &Path, index: LogIndex) -> ClusterResult<Vec<String>> {
    let segments = match catalog::list_segments(dir) {
        Ok(segments) => segments,
        Err(ClusterError::NoSegmentsFound) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let covered = catalog::covered_segments(&segments, index);
    let mut removed = Vec::with_capacity(covered);

    for segment in segments.into_iter().take(covered) {
        match fs::remove_file(dir.join(&segment.name)) {
            Ok(()) => {
                tracing::debug!(segment = %segment.name, index, "Removed compacted segment");
                removed.push(segment.name);
            }
            Err(e) => {
                tracing::warn!(
                    segment = %segment.name,
                    error = %e,
                    "Failed to remove compacted segment"
                );
            }
        }
    }

    Ok(removed)
}

/// State of the currently active (writable) segment.
struct ActiveSegment {
    /// Creation sequence of this segment.
    sequence: u64,
    /// Number of entries in this segment.
    entry_count: usize,
    /// File handle for appending.
    writer: BufWriter<File>,
}

/// Appends entries to the segment directory, rotating to a new file every
/// `max_entries` entries.
pub struct SegmentWriter {
    /// Directory holding the segments.
    dir: PathBuf,
    /// Maximum entries per segment before rotating.
    max_entries: usize,
    /// Sequence number of the newest segment on disk.
    last_sequence: Option<u64>,
    /// Index of the last entry on disk.
    last_index: LogIndex,
    /// Active segment state.
    active: Option<ActiveSegment>,
}

impl SegmentWriter {
    /// Open the segment directory for appending, creating it if needed.
    ///
    /// A torn tail in the newest segment is cut off by rewriting the segment
    /// with its intact entries.
    pub fn open(dir: impl Into<PathBuf>, max_entries: usize) -> ClusterResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut writer = Self {
            dir,
            max_entries: max_entries.max(1),
            last_sequence: None,
            last_index: 0,
            active: None,
        };

        let newest = match catalog::list_segments(&writer.dir) {
            Ok(mut segments) => segments.pop(),
            Err(ClusterError::NoSegmentsFound) => None,
            Err(e) => return Err(e),
        };

        if let Some(segment) = newest {
            writer.reopen(&segment)?;
        }

        Ok(writer)
    }

    fn reopen(&mut self, segment: &CatalogEntry) -> ClusterResult<()> {
        let path = self.dir.join(&segment.name);
        let contents = read_segment(&path)?;

        if contents.torn_tail {
            tracing::warn!(segment = %segment.name, "Truncating torn segment tail");
            self.rewrite(&path, &contents.entries)?;
        } else if !ends_with_newline(&path)? {
            // Appending now would glue the next record onto the last one
            tracing::warn!(segment = %segment.name, "Terminating unfinished final record");
            self.rewrite(&path, &contents.entries)?;
        }

        self.last_sequence = Some(segment.sequence);
        // An empty newest segment still marks where the log resumes.
        self.last_index = contents
            .entries
            .last()
            .map(|e| e.index)
            .unwrap_or(segment.index.saturating_sub(1));

        if contents.entries.len() < self.max_entries {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.active = Some(ActiveSegment {
                sequence: segment.sequence,
                entry_count: contents.entries.len(),
                writer: BufWriter::new(file),
            });
        }

        Ok(())
    }

    /// Write a segment file atomically (overwrites if exists).
    fn rewrite(&self, path: &Path, entries: &[LogEntry]) -> ClusterResult<()> {
        let temp_path = path.with_extension("wal.tmp");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);

        for entry in entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Create a new segment whose first entry will be `first_index`.
    fn open_segment(&mut self, first_index: LogIndex) -> ClusterResult<ActiveSegment> {
        let sequence = self.last_sequence.map_or(0, |s| s + 1);
        let path = self
            .dir
            .join(catalog::build_segment_name(sequence, first_index));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::debug!(sequence, first_index, "Started new log segment");

        self.last_sequence = Some(sequence);
        Ok(ActiveSegment {
            sequence,
            entry_count: 0,
            writer: BufWriter::new(file),
        })
    }

    /// Append entries, then flush and fsync.
    ///
    /// Entries must continue the log: each index is one past the previous.
    pub fn append(&mut self, entries: &[LogEntry]) -> ClusterResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        for entry in entries {
            let expected = self.last_index + 1;
            if entry.index != expected {
                return Err(ClusterError::OutOfOrder {
                    expected,
                    got: entry.index,
                });
            }

            let mut active = match self.active.take() {
                Some(active) if active.entry_count < self.max_entries => active,
                full => {
                    // Close the full segment before rotating
                    if let Some(mut full) = full {
                        full.writer.flush()?;
                        full.writer.get_ref().sync_all()?;
                    }
                    self.open_segment(entry.index)?
                }
            };

            serde_json::to_writer(&mut active.writer, entry)?;
            active.writer.write_all(b"\n")?;
            active.entry_count += 1;
            self.active = Some(active);
            self.last_index = entry.index;
        }

        if let Some(active) = &mut self.active {
            active.writer.flush()?;
            active.writer.get_ref().sync_all()?;
        }

        Ok(())
    }

    /// Index of the last entry on disk, 0 for an empty log.
    pub fn last_index(&self) -> LogIndex {
        self.last_index
    }

    /// Sequence number of the segment currently being appended to.
    pub fn active_sequence(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryPayload, Proposal};
    use tempfile::TempDir;

    fn test_entries(range: std::ops::RangeInclusive<u64>) -> Vec<LogEntry> {
        range
            .map(|i| LogEntry::normal(i, Proposal::new(format!("p{i}"))))
            .collect()
    }

    fn segment_count(dir: &Path) -> usize {
        catalog::list_segments(dir).map(|s| s.len()).unwrap_or(0)
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut writer = SegmentWriter::open(temp_dir.path(), 100).expect("open writer");

        writer.append(&test_entries(1..=10)).expect("append");
        assert_eq!(writer.last_index(), 10);

        let segments = catalog::list_segments(temp_dir.path()).expect("list");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 1);

        let contents = read_segment(&temp_dir.path().join(&segments[0].name)).expect("read");
        assert!(!contents.torn_tail);
        assert_eq!(contents.entries, test_entries(1..=10));
    }

    #[test]
    fn test_segment_rotation() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut writer = SegmentWriter::open(temp_dir.path(), 4).expect("open writer");

        writer.append(&test_entries(1..=10)).expect("append");

        let segments = catalog::list_segments(temp_dir.path()).expect("list");
        let layout: Vec<_> = segments.iter().map(|s| (s.sequence, s.index)).collect();
        assert_eq!(layout, vec![(0, 1), (1, 5), (2, 9)]);
        assert_eq!(writer.active_sequence(), Some(2));
    }

    #[test]
    fn test_reopen_continues_log() {
        let temp_dir = TempDir::new().expect("create temp dir");

        {
            let mut writer = SegmentWriter::open(temp_dir.path(), 4).expect("open writer");
            writer.append(&test_entries(1..=6)).expect("append");
        }

        let mut writer = SegmentWriter::open(temp_dir.path(), 4).expect("reopen writer");
        assert_eq!(writer.last_index(), 6);
        writer.append(&test_entries(7..=9)).expect("append");

        let segments = catalog::list_segments(temp_dir.path()).expect("list");
        let layout: Vec<_> = segments.iter().map(|s| (s.sequence, s.index)).collect();
        assert_eq!(layout, vec![(0, 1), (1, 5), (2, 9)]);
    }

    #[test]
    fn test_append_rejects_gaps() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut writer = SegmentWriter::open(temp_dir.path(), 4).expect("open writer");
        writer.append(&test_entries(1..=2)).expect("append");

        let err = writer.append(&test_entries(4..=4)).expect_err("gap");
        assert!(matches!(
            err,
            ClusterError::OutOfOrder {
                expected: 3,
                got: 4
            }
        ));
    }

    #[test]
    fn test_torn_tail_is_reported_and_truncated() {
        let temp_dir = TempDir::new().expect("create temp dir");
        {
            let mut writer = SegmentWriter::open(temp_dir.path(), 100).expect("open writer");
            writer.append(&test_entries(1..=3)).expect("append");
        }

        let name = catalog::build_segment_name(0, 1);
        let path = temp_dir.path().join(&name);
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(br#"{"index":4,"payl"#).expect("write torn");
        drop(file);

        let contents = read_segment(&path).expect("read");
        assert!(contents.torn_tail);
        assert_eq!(contents.entries.len(), 3);

        let mut writer = SegmentWriter::open(temp_dir.path(), 100).expect("reopen writer");
        assert_eq!(writer.last_index(), 3);
        writer.append(&test_entries(4..=4)).expect("append");

        let contents = read_segment(&path).expect("read");
        assert!(!contents.torn_tail);
        assert_eq!(contents.entries, test_entries(1..=4));
    }

    #[test]
    fn test_missing_final_newline_is_terminated() {
        let temp_dir = TempDir::new().expect("create temp dir");
        {
            let mut writer = SegmentWriter::open(temp_dir.path(), 100).expect("open writer");
            writer.append(&test_entries(1..=4)).expect("append");
        }

        // Last record is complete but its newline never hit the disk
        let path = temp_dir.path().join(catalog::build_segment_name(0, 1));
        let mut bytes = fs::read(&path).expect("read");
        assert_eq!(bytes.pop(), Some(b'\n'));
        fs::write(&path, bytes).expect("write");

        let mut writer = SegmentWriter::open(temp_dir.path(), 100).expect("reopen writer");
        assert_eq!(writer.last_index(), 4);
        writer.append(&test_entries(5..=5)).expect("append");
        drop(writer);

        let contents = read_segment(&path).expect("read");
        assert!(!contents.torn_tail);
        assert_eq!(contents.entries, test_entries(1..=5));

        let writer = SegmentWriter::open(temp_dir.path(), 100).expect("reopen writer");
        assert_eq!(writer.last_index(), 5);
    }

    #[test]
    fn test_corruption_before_tail_is_an_error() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join(catalog::build_segment_name(0, 1));
        let good = serde_json::to_string(&LogEntry {
            index: 2,
            payload: EntryPayload::Blank,
        })
        .expect("encode");
        fs::write(&path, format!("garbage\n{good}\n")).expect("write");

        let err = read_segment(&path).expect_err("corrupt");
        assert!(matches!(err, ClusterError::CorruptSegment { line: 1, .. }));
    }

    #[test]
    fn test_compaction_keeps_uncovered_segments() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut writer = SegmentWriter::open(temp_dir.path(), 4).expect("open writer");
        writer.append(&test_entries(1..=10)).expect("append");
        assert_eq!(segment_count(temp_dir.path()), 3);

        // Segment [1, 4] is covered, [5, 8] is not.
        let removed = compact_segments(temp_dir.path(), 6).expect("compact");
        assert_eq!(removed, vec![catalog::build_segment_name(0, 1)]);
        assert_eq!(segment_count(temp_dir.path()), 2);

        // The active segment survives even when fully covered.
        compact_segments(temp_dir.path(), 10).expect("compact");
        let segments = catalog::list_segments(temp_dir.path()).expect("list");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 9);
    }

    #[test]
    fn test_compaction_without_segments() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let removed = compact_segments(temp_dir.path(), 100).expect("compact");
        assert!(removed.is_empty());
    }
}
