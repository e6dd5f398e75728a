//! Layout file -> cluster map, end to end.

use basalt_cluster::cluster_map::ClusterMap;
use basalt_cluster::layout::{
    ClusterLayout, DiskSpec, LayoutLoader, NodeSpec, PartitionSpec, ReplicaPlacement,
};
use basalt_cluster::{DataNodeId, PartitionId, PartitionState, StaticClusterMap};
use std::io::Write;

fn two_node_layout() -> ClusterLayout {
    let disk = |mount: &str| DiskSpec {
        mount_path: mount.to_string(),
        capacity_bytes: 1 << 30,
    };
    ClusterLayout {
        nodes: vec![
            NodeSpec {
                hostname: "node-a".to_string(),
                port: 7075,
                disks: vec![disk("/mnt/a0"), disk("/mnt/a1")],
                full_auto: false,
            },
            NodeSpec {
                hostname: "node-b".to_string(),
                port: 7075,
                disks: vec![disk("/mnt/b0")],
                full_auto: true,
            },
        ],
        partitions: vec![PartitionSpec {
            id: PartitionId(314),
            capacity_bytes: 1 << 20,
            state: PartitionState::ReadWrite,
            replicas: vec![
                ReplicaPlacement {
                    hostname: "node-a".to_string(),
                    port: 7075,
                    mount_path: "/mnt/a1".to_string(),
                },
                ReplicaPlacement {
                    hostname: "node-b".to_string(),
                    port: 7075,
                    mount_path: "/mnt/b0".to_string(),
                },
            ],
        }],
    }
}

#[test]
fn layout_file_roundtrips_into_cluster_map() {
    let layout = two_node_layout();
    let mut file = tempfile::NamedTempFile::with_suffix(".json").unwrap();
    file.write_all(serde_json::to_string_pretty(&layout).unwrap().as_bytes())
        .unwrap();

    let loaded = LayoutLoader::from_path(file.path()).unwrap();
    assert_eq!(loaded, layout);

    let map = StaticClusterMap::from_layout(&loaded, "reserved").unwrap();
    let node_a = DataNodeId::new("node-a", 7075);
    let node_b = DataNodeId::new("node-b", 7075);

    let replicas_a = map.replica_ids(&node_a);
    assert_eq!(replicas_a.len(), 1);
    assert_eq!(replicas_a[0].partition_id(), PartitionId(314));
    assert!(replicas_a[0].path().starts_with("/mnt/a1"));
    // Placement reservations are already applied.
    assert_eq!(
        replicas_a[0].disk().available_bytes(),
        (1 << 30) - (1 << 20)
    );

    assert!(!map.is_node_in_full_auto_mode(&node_a));
    assert!(map.is_node_in_full_auto_mode(&node_b));
    assert_eq!(map.replica_ids(&node_b).len(), 1);
}

#[test]
fn oversubscribed_layout_is_rejected() {
    let mut layout = two_node_layout();
    layout.partitions[0].capacity_bytes = (1 << 30) + 1;

    let result = StaticClusterMap::from_layout(&layout, "reserved");
    assert!(matches!(
        result,
        Err(basalt_cluster::ClusterError::InsufficientCapacity { .. })
    ));
}
