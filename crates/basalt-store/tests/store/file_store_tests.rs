//! File blob-store lifecycle across process "restarts".

use basalt_cluster::{ReplicaMarker, ReplicaState};
use basalt_store::{BlobStore, FileBlobStore, LOG_HEADER_SIZE, StoreConfig, StoreError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn store_at(dir: &Path) -> FileBlobStore {
    FileBlobStore::new(dir.join("42"), "42", StoreConfig::default())
}

#[test_log::test]
fn blobs_survive_restart_without_clean_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let keys: Vec<String> = (0..20)
        .map(|_| format!("blob-{}", uuid::Uuid::new_v4()))
        .collect();

    {
        let store = store_at(dir.path());
        store.start().unwrap();
        for (index, key) in keys.iter().enumerate() {
            store.put(key, format!("value-{index}").as_bytes()).unwrap();
        }
        // Dropped without shutdown, like a crash.
    }

    let store = store_at(dir.path());
    store.start().unwrap();
    for (index, key) in keys.iter().enumerate() {
        assert_eq!(store.get(key).unwrap(), format!("value-{index}").as_bytes());
    }
    store.shutdown().unwrap();
}

#[test_log::test]
fn compaction_output_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    store.start().unwrap();

    store.put("keep", b"kept").unwrap();
    for index in 0..10 {
        store.put(&format!("temp-{index}"), &[0u8; 256]).unwrap();
    }
    for index in 0..10 {
        store.delete(&format!("temp-{index}")).unwrap();
    }
    assert!(store.compact().unwrap() > 2560);
    store.shutdown().unwrap();

    let store = store_at(dir.path());
    store.start().unwrap();
    assert_eq!(store.get("keep").unwrap(), b"kept");
    for index in 0..10 {
        assert!(store.get(&format!("temp-{index}")).is_err());
    }
    store.shutdown().unwrap();
}

#[test_log::test]
fn stale_compacting_log_is_discarded_at_start() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = store_at(dir.path());
        store.start().unwrap();
        store.put("k", b"v").unwrap();
        store.shutdown().unwrap();
    }
    // Simulate a crash that left half-written compaction output behind.
    std::fs::write(dir.path().join("42").join("log_compacting"), b"half").unwrap();

    let store = store_at(dir.path());
    store.start().unwrap();
    assert!(!dir.path().join("42").join("log_compacting").exists());
    assert_eq!(store.get("k").unwrap(), b"v");
    store.shutdown().unwrap();
}

#[test_log::test]
fn decommission_marker_sets_recovery_flag_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let replica_dir = dir.path().join("42");
    std::fs::create_dir_all(&replica_dir).unwrap();
    std::fs::write(
        replica_dir.join(ReplicaMarker::DecommissionInProgress.file_name()),
        b"",
    )
    .unwrap();

    let store = store_at(dir.path());
    store.start().unwrap();
    assert!(store.recover_from_decommission());

    // Clearing the flag in memory does not delete the on-disk marker; that
    // is the transition callback's job.
    store.set_recover_from_decommission(false);
    assert!(
        replica_dir
            .join(ReplicaMarker::DecommissionInProgress.file_name())
            .exists()
    );
    store.shutdown().unwrap();
}

#[test_log::test]
fn size_is_readable_while_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());

    // Never-created store reads as zero bytes.
    assert_eq!(store.size_in_bytes().unwrap(), 0);

    store.start().unwrap();
    store.put("k", b"v").unwrap();
    let live_size = store.size_in_bytes().unwrap();
    assert!(live_size > LOG_HEADER_SIZE);
    store.shutdown().unwrap();

    assert_eq!(store.size_in_bytes().unwrap(), live_size);
}

#[test_log::test]
fn immutable_blobs_are_superseded_not_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    store.start().unwrap();

    store.put("k", b"first").unwrap();
    let size_after_first = store.size_in_bytes().unwrap();
    store.put("k", b"second").unwrap();

    // The log only grows; the old entry stays until compaction.
    assert!(store.size_in_bytes().unwrap() > size_after_first);
    assert_eq!(store.get("k").unwrap(), b"second");

    let reclaimed = store.compact().unwrap();
    assert!(reclaimed > 0);
    assert_eq!(store.get("k").unwrap(), b"second");
    store.shutdown().unwrap();
}

#[test_log::test]
fn writes_racing_a_shutdown_are_turned_away_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store_at(dir.path()));
    store.start().unwrap();

    // Hammer puts from one thread while the other shuts the store down.
    // Every rejected write must carry a shutdown-shaped error, never an I/O
    // failure from racing the closing log.
    let writer = {
        let store = store.clone();
        std::thread::spawn(move || {
            let mut accepted = Vec::new();
            for index in 0..10_000u32 {
                let key = format!("blob-{index}");
                match store.put(&key, b"payload") {
                    Ok(()) => accepted.push(key),
                    Err(
                        StoreError::StoreShuttingDown { .. }
                        | StoreError::StoreNotStarted { .. },
                    ) => break,
                    Err(other) => panic!("unexpected error during shutdown race: {other}"),
                }
            }
            accepted
        })
    };

    std::thread::sleep(Duration::from_millis(5));
    store.shutdown().unwrap();
    let accepted = writer.join().unwrap();

    // Every write the store accepted survives a restart.
    let store = store_at(dir.path());
    store.start().unwrap();
    for key in &accepted {
        assert_eq!(store.get(key).unwrap(), b"payload");
    }
    store.shutdown().unwrap();
}

#[test_log::test]
fn state_surface_matches_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    store.start().unwrap();

    store.set_current_state(ReplicaState::Bootstrap);
    store.set_current_state(ReplicaState::Standby);
    store.set_current_state(ReplicaState::Leader);
    assert_eq!(store.previous_state(), ReplicaState::Standby);

    assert!(matches!(
        store.start(),
        Err(StoreError::StoreAlreadyStarted { .. })
    ));
    store.shutdown().unwrap();
}
