//! Startup recovery tests.
//!
//! Each test lays out a data directory by hand, then starts a node on a
//! scripted engine and checks what state it comes up with.

mod common;

use common::{put, scripted_engine, start_scripted, test_config};
use raftkv_cluster::storage::{SegmentWriter, SnapshotStore, build_segment_name};
use raftkv_cluster::{ClusterError, ClusterNode, KvStateMachine, NodeState};
use std::fs;
use tempfile::TempDir;

/// Test that a node with no data starts empty.
#[tokio::test]
async fn test_empty_recovery() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let (node, handle, _control) = start_scripted(config, 0)
        .await
        .expect("Failed to start node");

    assert_eq!(node.state(), NodeState::Running);
    assert_eq!(handle.applied_index(), 0);
    assert_eq!(handle.lookup("x"), None);
    assert!(node.state_machine().state().data.is_empty());

    node.stop().await.expect("Failed to stop node");
}

/// Test that the log suffix after the newest snapshot is replayed on top.
#[tokio::test]
async fn test_snapshot_plus_segment_recovery() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    // Snapshot {x: "1"} covering index 1
    let source = KvStateMachine::new();
    source.apply(&[put(1, "x", "1")]).expect("apply");
    let store = SnapshotStore::open(config.snap_dir(), 3).expect("open store");
    store
        .save(1, &source.snapshot().expect("snapshot"))
        .expect("save snapshot");

    // Log holds the snapshotted entry and one more
    let mut writer = SegmentWriter::open(config.wal_dir(), 100).expect("open writer");
    writer
        .append(&[put(1, "x", "1"), put(2, "x", "2")])
        .expect("append");
    drop(writer);

    let (node, handle, _control) = start_scripted(config, 2)
        .await
        .expect("Failed to start node");

    assert_eq!(handle.lookup("x").as_deref(), Some("2"));
    assert_eq!(handle.applied_index(), 2);

    node.stop().await.expect("Failed to stop node");
}

/// Test that recovery spans several segments.
#[tokio::test]
async fn test_recovery_across_segments() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let mut writer = SegmentWriter::open(config.wal_dir(), 3).expect("open writer");
    let entries: Vec<_> = (1..=10)
        .map(|i| put(i, &format!("k{i}"), &i.to_string()))
        .collect();
    writer.append(&entries).expect("append");
    drop(writer);

    let (node, handle, _control) = start_scripted(config, 10)
        .await
        .expect("Failed to start node");

    assert_eq!(handle.applied_index(), 10);
    for i in 1..=10 {
        assert_eq!(handle.lookup(&format!("k{i}")), Some(i.to_string()));
    }

    node.stop().await.expect("Failed to stop node");
}

/// Test that a corrupt newest snapshot is skipped in favour of an older one.
#[tokio::test]
async fn test_corrupt_snapshot_falls_back() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let sm = KvStateMachine::new();
    let store = SnapshotStore::open(config.snap_dir(), 3).expect("open store");
    sm.apply(&[put(1, "x", "old")]).expect("apply");
    store.save(1, &sm.snapshot().expect("snapshot")).expect("save");
    sm.apply(&[put(2, "x", "new")]).expect("apply");
    let newest = store.save(2, &sm.snapshot().expect("snapshot")).expect("save");
    fs::write(config.snap_dir().join(newest.as_str()), b"garbage").expect("corrupt");

    let mut writer = SegmentWriter::open(config.wal_dir(), 100).expect("open writer");
    writer
        .append(&[put(1, "x", "old"), put(2, "x", "new")])
        .expect("append");
    drop(writer);

    let (node, handle, _control) = start_scripted(config, 2)
        .await
        .expect("Failed to start node");

    // Older snapshot plus log replay still reaches the same state
    assert_eq!(handle.lookup("x").as_deref(), Some("new"));

    node.stop().await.expect("Failed to stop node");
}

/// Test that a node refuses to start when every snapshot is corrupt.
#[tokio::test]
async fn test_all_snapshots_corrupt_fails_closed() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    fs::create_dir_all(config.snap_dir()).expect("create snap dir");
    fs::write(
        config.snap_dir().join("0000000000000001-0000000000000005.snap"),
        b"junk",
    )
    .expect("write");

    let err = start_scripted(config, 0)
        .await
        .err()
        .expect("start should fail");
    assert!(matches!(err, ClusterError::CorruptSnapshot { .. }));
}

/// Test that a hole in the log aborts startup.
#[tokio::test]
async fn test_missing_segment_fails_startup() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let mut writer = SegmentWriter::open(config.wal_dir(), 2).expect("open writer");
    writer
        .append(&[put(1, "a", "1"), put(2, "a", "2"), put(3, "a", "3")])
        .expect("append");
    drop(writer);
    fs::remove_file(config.wal_dir().join(build_segment_name(0, 1))).expect("remove segment");

    let err = start_scripted(config, 3)
        .await
        .err()
        .expect("start should fail");
    assert!(matches!(err, ClusterError::MissingSegment { index: 1 }));
}

/// Test that the engine claiming more commits than the log holds aborts startup.
#[tokio::test]
async fn test_short_log_fails_startup() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let mut writer = SegmentWriter::open(config.wal_dir(), 10).expect("open writer");
    writer.append(&[put(1, "a", "1")]).expect("append");
    drop(writer);

    let err = start_scripted(config, 5)
        .await
        .err()
        .expect("start should fail");
    assert!(matches!(err, ClusterError::MissingSegment { index: 2 }));
}

/// Test that a torn final record is tolerated.
#[tokio::test]
async fn test_torn_tail_is_tolerated() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let mut writer = SegmentWriter::open(config.wal_dir(), 10).expect("open writer");
    writer
        .append(&[put(1, "a", "1"), put(2, "b", "2")])
        .expect("append");
    drop(writer);

    let path = config.wal_dir().join(build_segment_name(0, 1));
    let mut bytes = fs::read(&path).expect("read");
    bytes.extend_from_slice(br#"{"index":3,"payload":{"Norm"#);
    fs::write(&path, bytes).expect("write");

    let (node, handle, _control) = start_scripted(config, 2)
        .await
        .expect("Failed to start node");
    assert_eq!(handle.lookup("b").as_deref(), Some("2"));

    node.stop().await.expect("Failed to stop node");
}

/// Test that a fatal signal before readiness aborts startup.
#[tokio::test]
async fn test_fatal_before_ready() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let (engine, mut control) = scripted_engine(16);
    control.fail("disk on fire");

    let err = ClusterNode::start(config, engine)
        .await
        .err()
        .expect("start should fail");
    match err {
        ClusterError::Fatal(reason) => assert_eq!(reason, "disk on fire"),
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Test that an engine vanishing before readiness aborts startup.
#[tokio::test]
async fn test_engine_gone_before_ready() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(temp_dir.path());

    let (engine, mut control) = scripted_engine(16);
    control.close();

    let err = ClusterNode::start(config, engine)
        .await
        .err()
        .expect("start should fail");
    assert!(matches!(err, ClusterError::EngineClosed));
}

/// Test that an invalid configuration is rejected before anything starts.
#[tokio::test]
async fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(temp_dir.path());
    config.queues.commit_capacity = 0;

    let (engine, _control) = scripted_engine(16);
    let err = ClusterNode::start(config, engine)
        .await
        .err()
        .expect("start should fail");
    assert!(matches!(err, ClusterError::Config(_)));
}
