//! Stop-state persistence through the replica-status delegates.

use super::test_utilities::*;
use basalt_cluster::{
    ClusterParticipant, Disk, LocalParticipant, Partition, PartitionId, ReplicaDescriptor,
    ReplicaStatusDelegate, ReplicaSyncUpManager, StaticClusterMap,
};
use basalt_node::StorageManager;
use basalt_store::{DiskManagerConfig, StoreConfig};
use std::collections::HashSet;
use std::sync::Arc;

struct TwoParticipantNode {
    _dir: tempfile::TempDir,
    manager: Arc<StorageManager>,
    primary: Arc<LocalParticipant>,
    secondary: Arc<LocalParticipant>,
}

fn start_two_participant_node(partitions: &[u64]) -> TwoParticipantNode {
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(Disk::new(dir.path().join("disk0"), DISK_CAPACITY, "reserved"));
    let cluster_map = Arc::new(StaticClusterMap::new());
    cluster_map.add_node(node_id(), vec![disk.clone()]);
    for &id in partitions {
        let partition = Partition::new(PartitionId(id), PARTITION_CAPACITY);
        cluster_map.add_partition(partition);
        assert!(disk.try_reserve(PARTITION_CAPACITY));
        cluster_map.register_replica(
            &node_id(),
            Arc::new(ReplicaDescriptor::new(partition, disk.clone())),
        );
    }

    let sync_up = RecordingSyncUp::new(new_event_log());
    let primary = Arc::new(LocalParticipant::new(
        node_id(),
        Some(sync_up as Arc<dyn ReplicaSyncUpManager>),
    ));
    let secondary = Arc::new(LocalParticipant::new(node_id(), None));

    let manager = StorageManager::new(
        StoreConfig::default(),
        DiskManagerConfig::default(),
        cluster_map,
        node_id(),
        vec![
            primary.clone() as Arc<dyn ClusterParticipant>,
            secondary.clone() as Arc<dyn ClusterParticipant>,
        ],
    )
    .unwrap();
    manager.start().unwrap();

    TwoParticipantNode {
        _dir: dir,
        manager,
        primary,
        secondary,
    }
}

#[test]
fn stop_state_is_persisted_through_every_delegate() {
    let node = start_two_participant_node(&[1, 2]);

    let failed = node
        .manager
        .set_blob_store_stopped_state(&[PartitionId(1), PartitionId(2)], true);
    assert!(failed.is_empty());

    // The in-memory view equals the union of the per-participant persisted
    // sets.
    let expected: HashSet<String> = ["1".to_string(), "2".to_string()].into();
    for participant in [&node.primary, &node.secondary] {
        let persisted: HashSet<String> = participant
            .status_delegate_handle()
            .stopped_replicas()
            .into_iter()
            .collect();
        assert_eq!(persisted, expected);
    }

    let failed = node.manager.set_blob_store_stopped_state(&[PartitionId(1)], false);
    assert!(failed.is_empty());
    for participant in [&node.primary, &node.secondary] {
        assert_eq!(
            participant.status_delegate_handle().stopped_replicas(),
            vec!["2".to_string()]
        );
    }

    node.manager.shutdown();
}

#[test]
fn unknown_partitions_are_reported_as_failures() {
    let node = start_two_participant_node(&[1]);

    let failed = node
        .manager
        .set_blob_store_stopped_state(&[PartitionId(1), PartitionId(8)], true);
    assert_eq!(failed, vec![PartitionId(8)]);

    node.manager.shutdown();
}

#[test]
fn delegate_failure_keeps_partition_in_failed_list() {
    let node = start_two_participant_node(&[1]);
    node.secondary.status_delegate_handle().set_fail_updates(true);

    let failed = node.manager.set_blob_store_stopped_state(&[PartitionId(1)], true);
    assert_eq!(failed, vec![PartitionId(1)]);

    node.manager.shutdown();
}

#[test]
fn stopped_replicas_stay_down_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(Disk::new(dir.path().join("disk0"), DISK_CAPACITY, "reserved"));
    let cluster_map = Arc::new(StaticClusterMap::new());
    cluster_map.add_node(node_id(), vec![disk.clone()]);
    let partition = Partition::new(PartitionId(1), PARTITION_CAPACITY);
    cluster_map.add_partition(partition);
    assert!(disk.try_reserve(PARTITION_CAPACITY));
    let replica = Arc::new(ReplicaDescriptor::new(partition, disk.clone()));
    cluster_map.register_replica(&node_id(), replica.clone());

    // The participant (and its delegate) outlives the storage manager, the
    // way coordinator-persisted state outlives a process.
    let participant = Arc::new(LocalParticipant::new(node_id(), None));
    participant
        .status_delegate_handle()
        .set_stopped(&[replica], true);

    let manager = StorageManager::new(
        StoreConfig::default(),
        DiskManagerConfig::default(),
        cluster_map,
        node_id(),
        vec![participant.clone() as Arc<dyn ClusterParticipant>],
    )
    .unwrap();
    manager.start().unwrap();

    // The stopped store was not opened at startup.
    assert!(manager.get_store(PartitionId(1), false).is_none());
    assert!(manager.get_store(PartitionId(1), true).is_some());

    // An explicit start clears the stop.
    assert!(manager.start_blob_store(PartitionId(1)));
    assert!(manager.get_store(PartitionId(1), false).is_some());

    manager.shutdown();
}
