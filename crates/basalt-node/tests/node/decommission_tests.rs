//! STANDBY -> INACTIVE and OFFLINE -> DROPPED: the decommission protocol.

use super::test_utilities::*;
use basalt_cluster::{
    PartitionId, PartitionStateTransition, ReplicaMarker, ReplicaState, ReplicaSyncUpManager,
    StateTransitionErrorKind, UpdateFailureMode,
};
use basalt_store::StoreConfig;

#[test_log::test]
fn standby_to_inactive_marks_and_disables_compaction() {
    let node = start_node(&[1]);
    let replica = node.manager.get_replica("1").unwrap();
    let store = node.manager.get_store(PartitionId(1), true).unwrap();

    node.participant
        .transition("1", PartitionStateTransition::StandbyToInactive)
        .unwrap();

    assert!(replica.has_marker(ReplicaMarker::DecommissionInProgress));
    assert_eq!(store.current_state(), ReplicaState::Inactive);
    // Compaction disabled for the partition: explicit scheduling refuses it.
    assert!(!node.manager.schedule_next_for_compaction(PartitionId(1)));
    // The replication listener saw the transition after the storage manager.
    assert!(events(&node.events).contains(&"replication.standby_to_inactive".to_string()));

    node.manager.shutdown();
}

#[test_log::test]
fn standby_to_inactive_on_disabled_store_fails_without_side_effects() {
    let node = start_node(&[1]);
    let replica = node.manager.get_replica("1").unwrap();
    let store = node.manager.get_store(PartitionId(1), true).unwrap();
    store.set_disabled(true);

    let error = node
        .participant
        .transition("1", PartitionStateTransition::StandbyToInactive)
        .unwrap_err();

    assert_eq!(error.kind, StateTransitionErrorKind::ReplicaOperationFailure);
    assert!(!replica.has_marker(ReplicaMarker::DecommissionInProgress));
    assert_eq!(store.current_state(), ReplicaState::Offline);

    // Compaction was never disabled: once the store is usable again,
    // scheduling works.
    store.set_disabled(false);
    assert!(node.manager.schedule_next_for_compaction(PartitionId(1)));

    node.manager.shutdown();
}

#[test_log::test]
fn standby_to_inactive_error_kinds() {
    let node = start_node(&[1]);

    let error = node
        .participant
        .transition("9", PartitionStateTransition::StandbyToInactive)
        .unwrap_err();
    assert_eq!(error.kind, StateTransitionErrorKind::ReplicaNotFound);

    assert!(node.manager.shutdown_blob_store(PartitionId(1)));
    let error = node
        .participant
        .transition("1", PartitionStateTransition::StandbyToInactive)
        .unwrap_err();
    assert_eq!(error.kind, StateTransitionErrorKind::StoreNotStarted);

    node.manager.shutdown();
}

#[test_log::test]
fn dropped_without_pending_decommission_removes_everything() {
    let node = start_node(&[1, 2]);
    let replica = node.manager.get_replica("1").unwrap();
    let replica_path = replica.path().to_path_buf();

    node.participant
        .transition("1", PartitionStateTransition::OfflineToDropped)
        .unwrap();

    assert!(node.manager.get_replica("1").is_none());
    assert!(!node.manager.local_partitions().contains(&PartitionId(1)));
    assert!(!replica_path.exists());
    assert!(!node.participant.local_partitions().contains("1"));

    // Stats then replication, and no sync-up barrier was touched.
    let log = events(&node.events);
    let stats_at = log
        .iter()
        .position(|event| event == "stats.dropped_from_offline")
        .expect("stats listener invoked");
    let replication_at = log
        .iter()
        .position(|event| event == "replication.dropped_from_offline")
        .expect("replication listener invoked");
    assert!(stats_at < replication_at);
    assert!(!log.iter().any(|event| event.starts_with("syncup.")));

    // The untouched partition is still being served.
    assert!(node.manager.get_store(PartitionId(2), false).is_some());

    node.manager.shutdown();
}

#[test_log::test]
fn dropped_resumes_interrupted_decommission_in_order() {
    // The decommission marker survives a crash; the store loads it and
    // reports recover-from-decommission.
    let node = start_node_with(&[1], 1, StoreConfig::default(), |mount| {
        let replica_dir = mount.join("1");
        std::fs::create_dir_all(&replica_dir).unwrap();
        std::fs::write(
            replica_dir.join(ReplicaMarker::DecommissionInProgress.file_name()),
            b"",
        )
        .unwrap();
    });
    let store = node.manager.get_store(PartitionId(1), true).unwrap();
    assert!(store.recover_from_decommission());

    let participant = node.participant.clone();
    let worker =
        std::thread::spawn(move || {
            participant.transition("1", PartitionStateTransition::OfflineToDropped)
        });

    // The resume path repeats STANDBY->INACTIVE, drives the replication
    // listener, and parks on the deactivation barrier.
    assert!(wait_for_event(&node.events, "syncup.wait_deactivation", 2000));
    assert!(!worker.is_finished());
    node.sync_up.on_deactivation_complete("1");

    assert!(wait_for_event(&node.events, "syncup.wait_disconnection", 2000));
    node.sync_up.on_disconnection_complete("1");

    worker.join().unwrap().unwrap();

    let log = events(&node.events);
    let expected = [
        "replication.standby_to_inactive",
        "syncup.wait_deactivation",
        "replication.inactive_to_offline",
        "syncup.wait_disconnection",
        "stats.dropped_from_offline",
        "replication.dropped_from_offline",
    ];
    let positions: Vec<usize> = expected
        .iter()
        .map(|needle| {
            log.iter()
                .position(|event| event == needle)
                .unwrap_or_else(|| panic!("missing event {needle} in {log:?}"))
        })
        .collect();
    assert!(
        positions.windows(2).all(|pair| pair[0] < pair[1]),
        "events out of order: {log:?}"
    );

    assert!(node.manager.get_replica("1").is_none());
    assert!(!node.mount().join("1").exists());

    node.manager.shutdown();
}

#[test_log::test]
fn dropped_for_departed_partition_purges_residual_directory() {
    // Residue from a crash mid-decommission, for a partition the
    // coordinator already forgot.
    let node = start_node_with(&[1], 1, StoreConfig::default(), |mount| {
        let residue = residual_dir(mount, "99");
        std::fs::create_dir_all(&residue).unwrap();
        std::fs::write(residue.join("log_current"), b"stale").unwrap();
    });
    assert!(
        node.manager
            .unexpected_dirs()
            .iter()
            .any(|path| path.ends_with("99"))
    );

    node.participant
        .transition("99", PartitionStateTransition::OfflineToDropped)
        .unwrap();

    assert!(!residual_dir(node.mount(), "99").exists());
    assert!(
        !node
            .manager
            .unexpected_dirs()
            .iter()
            .any(|path| path.ends_with("99"))
    );
    // Nothing else happened.
    assert!(node.manager.get_store(PartitionId(1), false).is_some());

    node.manager.shutdown();
}

#[test_log::test]
fn full_auto_short_circuit_triggers_resume() {
    // A full-auto coordinator can go straight to DROPPED; the fresh store's
    // previous state is OFFLINE, which must trigger the resume branch.
    let node = start_node(&[1]);
    node.cluster_map.set_full_auto(&node_id(), true);

    // Pre-complete both barriers so the transition runs synchronously.
    node.sync_up.on_deactivation_complete("1");
    node.sync_up.on_disconnection_complete("1");

    node.participant
        .transition("1", PartitionStateTransition::OfflineToDropped)
        .unwrap();

    let log = events(&node.events);
    assert!(log.contains(&"syncup.wait_deactivation".to_string()));
    assert!(log.contains(&"syncup.wait_disconnection".to_string()));
    assert!(node.manager.get_replica("1").is_none());

    node.manager.shutdown();
}

#[test_log::test]
fn full_auto_resume_respects_config_switch() {
    let config = StoreConfig {
        full_auto_resume_on_offline_previous_state: false,
        ..Default::default()
    };
    let node = start_node_with(&[1], 1, config, |_| {});
    node.cluster_map.set_full_auto(&node_id(), true);

    node.participant
        .transition("1", PartitionStateTransition::OfflineToDropped)
        .unwrap();

    // Straight drop, no sync-up involvement.
    assert!(
        !events(&node.events)
            .iter()
            .any(|event| event.starts_with("syncup."))
    );
    assert!(node.manager.get_replica("1").is_none());

    node.manager.shutdown();
}

#[test_log::test]
fn dropped_surfaces_coordinator_update_failure() {
    let node = start_node(&[1]);
    node.participant
        .set_update_failure_mode(Some(UpdateFailureMode::Rejected));

    let error = node
        .participant
        .transition("1", PartitionStateTransition::OfflineToDropped)
        .unwrap_err();
    assert_eq!(error.kind, StateTransitionErrorKind::ClusterUpdateFailure);

    // The replica was not removed; the coordinator will retry.
    assert!(node.manager.get_replica("1").is_some());
    assert_eq!(node.manager.metrics().snapshot().state_transition_errors, 1);

    node.participant.set_update_failure_mode(None);
    node.manager.shutdown();
}

#[test_log::test]
fn aborted_sync_up_fails_resume_and_counts_it() {
    let node = start_node_with(&[1], 1, StoreConfig::default(), |mount| {
        let replica_dir = mount.join("1");
        std::fs::create_dir_all(&replica_dir).unwrap();
        std::fs::write(
            replica_dir.join(ReplicaMarker::DecommissionInProgress.file_name()),
            b"",
        )
        .unwrap();
    });

    let participant = node.participant.clone();
    let worker =
        std::thread::spawn(move || {
            participant.transition("1", PartitionStateTransition::OfflineToDropped)
        });

    assert!(wait_for_event(&node.events, "syncup.wait_deactivation", 2000));
    node.sync_up.abort("1");

    let error = worker.join().unwrap().unwrap_err();
    assert_eq!(error.kind, StateTransitionErrorKind::ReplicaOperationFailure);
    assert_eq!(
        node.manager.metrics().snapshot().resume_decommission_errors,
        1
    );
    // The replica survives the failed drop.
    assert!(node.manager.get_replica("1").is_some());

    node.manager.shutdown();
}
