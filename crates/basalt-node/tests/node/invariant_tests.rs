//! Cross-operation invariants over the storage-manager maps and disk
//! bookkeeping.

use super::test_utilities::*;
use basalt_cluster::{ClusterMap, PartitionId, PartitionStateTransition};
use std::collections::BTreeSet;

fn map_snapshot(node: &TestNode) -> (BTreeSet<PartitionId>, BTreeSet<String>) {
    let partitions: BTreeSet<PartitionId> = node.manager.local_partitions().into_iter().collect();
    let names: BTreeSet<String> = partitions
        .iter()
        .map(|partition| partition.to_path_name())
        .collect();
    (partitions, names)
}

fn assert_maps_consistent(node: &TestNode) {
    for partition in node.manager.local_partitions() {
        // Every mapped partition resolves to a store its disk manager owns
        // and to a replica in the name map.
        assert!(
            node.manager.get_store(partition, true).is_some(),
            "partition {partition} mapped without a store"
        );
        let replica = node
            .manager
            .get_replica(&partition.to_path_name())
            .unwrap_or_else(|| panic!("partition {partition} missing from name map"));
        assert!(replica.path().starts_with(replica.disk().mount_path()));
    }
}

fn assert_disk_bookkeeping(node: &TestNode) {
    for disk in &node.disks {
        assert!(disk.available_bytes() <= disk.raw_capacity_bytes());
    }
}

#[test]
fn add_remove_roundtrip_restores_maps_exactly() {
    let node = start_node(&[1, 2]);
    let before = map_snapshot(&node);

    let partition = register_partition(&node, 7);
    let replica = node
        .cluster_map
        .bootstrap_replica("7", &node_id())
        .unwrap();
    assert!(node.manager.add_blob_store(replica));
    assert_maps_consistent(&node);

    node.manager.remove_blob_store(partition).unwrap();
    assert_eq!(map_snapshot(&node), before);
    assert_maps_consistent(&node);
    assert_disk_bookkeeping(&node);

    node.manager.shutdown();
}

#[test]
fn maps_stay_consistent_through_a_full_lifecycle() {
    let node = start_node(&[1, 2, 3]);
    assert_maps_consistent(&node);

    node.participant
        .transition("2", PartitionStateTransition::OfflineToBootstrap)
        .unwrap();
    assert_maps_consistent(&node);

    node.participant
        .transition("2", PartitionStateTransition::StandbyToInactive)
        .unwrap();
    assert_maps_consistent(&node);

    node.participant
        .transition("2", PartitionStateTransition::OfflineToDropped)
        .unwrap();
    assert_maps_consistent(&node);
    assert_disk_bookkeeping(&node);

    // Dropped partition is fully gone from both maps and from disk.
    assert!(!node.manager.local_partitions().contains(&PartitionId(2)));
    assert!(node.manager.get_replica("2").is_none());
    assert!(!node.mount().join("2").exists());

    node.manager.shutdown();
}

#[test]
fn concurrent_transitions_across_partitions() {
    let partition_ids: Vec<u64> = (1..=8).collect();
    let node = start_node(&partition_ids);

    std::thread::scope(|scope| {
        for id in &partition_ids {
            let participant = node.participant.clone();
            let name = id.to_string();
            scope.spawn(move || {
                participant
                    .transition(&name, PartitionStateTransition::OfflineToBootstrap)
                    .unwrap();
            });
        }
    });

    assert_maps_consistent(&node);
    for id in partition_ids {
        let store = node.manager.get_store(PartitionId(id), false).unwrap();
        assert_eq!(store.current_state(), basalt_cluster::ReplicaState::Bootstrap);
    }

    node.manager.shutdown();
}

#[test]
fn metrics_count_transition_errors() {
    let node = start_node(&[1]);

    // Two failed transitions for an unknown partition.
    for _ in 0..2 {
        node.participant
            .transition("9", PartitionStateTransition::StandbyToInactive)
            .unwrap_err();
    }
    assert_eq!(node.manager.metrics().snapshot().state_transition_errors, 2);

    node.manager.shutdown();
}

#[test]
fn start_is_a_noop_when_called_twice() {
    let node = start_node(&[1]);
    let started_at = node.manager.started_at();

    node.manager.start().unwrap();
    assert_eq!(node.manager.started_at(), started_at);
    assert!(node.manager.get_store(PartitionId(1), false).is_some());

    node.manager.shutdown();
}
