//! Cluster map: the authoritative view of replica placement.

use crate::error::ClusterError;
use crate::layout::ClusterLayout;
use crate::types::*;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Authoritative replica placement, as published by the coordinator.
pub trait ClusterMap: Send + Sync {
    /// All replicas placed on `node`.
    fn replica_ids(&self, node: &DataNodeId) -> Vec<Arc<ReplicaDescriptor>>;

    /// Allocate a new replica of `partition_name` on `node` for dynamic
    /// bootstrap. On success the chosen disk's available bytes have been
    /// decreased by the replica capacity; if the caller fails to materialize
    /// the store it must release that reservation.
    fn bootstrap_replica(
        &self,
        partition_name: &str,
        node: &DataNodeId,
    ) -> Option<Arc<ReplicaDescriptor>>;

    /// Whether the coordinator manages `node` in full-auto mode (replica
    /// moves may skip parts of the local lifecycle).
    fn is_node_in_full_auto_mode(&self, node: &DataNodeId) -> bool;
}

#[derive(Debug)]
struct NodeEntry {
    disks: Vec<Arc<Disk>>,
    replicas: Vec<Arc<ReplicaDescriptor>>,
    full_auto: bool,
}

#[derive(Debug, Default)]
struct MapState {
    partitions: HashMap<PartitionId, Partition>,
    nodes: HashMap<DataNodeId, NodeEntry>,
}

/// In-memory cluster map built from a [`ClusterLayout`].
///
/// Suitable for static clusters, development, and tests; a coordinator-backed
/// implementation would keep the same surface and refresh behind the lock.
#[derive(Default)]
pub struct StaticClusterMap {
    state: RwLock<MapState>,
}

impl StaticClusterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from a validated layout. Placement reservations are
    /// applied to each disk so available-bytes bookkeeping starts correct.
    #[tracing::instrument(level = "info", skip(layout), fields(nodes = layout.nodes.len(), partitions = layout.partitions.len()))]
    pub fn from_layout(
        layout: &ClusterLayout,
        reserved_dir_name: &str,
    ) -> Result<Self, ClusterError> {
        layout.validate()?;
        let map = Self::new();
        {
            let mut state = map.state.write();
            for node_spec in &layout.nodes {
                let disks = node_spec
                    .disks
                    .iter()
                    .map(|disk_spec| {
                        Arc::new(Disk::new(
                            &disk_spec.mount_path,
                            disk_spec.capacity_bytes,
                            reserved_dir_name,
                        ))
                    })
                    .collect();
                state.nodes.insert(
                    node_spec.id(),
                    NodeEntry {
                        disks,
                        replicas: Vec::new(),
                        full_auto: node_spec.full_auto,
                    },
                );
            }

            for partition_spec in &layout.partitions {
                let partition = Partition {
                    id: partition_spec.id,
                    capacity_bytes: partition_spec.capacity_bytes,
                    state: partition_spec.state,
                };
                state.partitions.insert(partition.id, partition);

                for placement in &partition_spec.replicas {
                    let node = placement.node();
                    let entry =
                        state
                            .nodes
                            .get_mut(&node)
                            .ok_or_else(|| ClusterError::NodeNotFound {
                                node: node.to_string(),
                            })?;
                    let disk = entry
                        .disks
                        .iter()
                        .find(|disk| disk.mount_path() == std::path::Path::new(&placement.mount_path))
                        .cloned()
                        .ok_or_else(|| ClusterError::InvalidLayout {
                            context: format!("partition {}", partition.id),
                            reason: format!("unknown mount '{}'", placement.mount_path),
                        })?;
                    if !disk.try_reserve(partition.capacity_bytes) {
                        return Err(ClusterError::InsufficientCapacity {
                            partition: partition.id.to_path_name(),
                        });
                    }
                    entry
                        .replicas
                        .push(Arc::new(ReplicaDescriptor::new(partition, disk)));
                }
            }
        }
        Ok(map)
    }

    /// Register a node with its disks.
    pub fn add_node(&self, node: DataNodeId, disks: Vec<Arc<Disk>>) {
        let mut state = self.state.write();
        state.nodes.insert(
            node,
            NodeEntry {
                disks,
                replicas: Vec::new(),
                full_auto: false,
            },
        );
    }

    /// Register a partition so `bootstrap_replica` can allocate copies of it.
    pub fn add_partition(&self, partition: Partition) {
        self.state.write().partitions.insert(partition.id, partition);
    }

    pub fn set_full_auto(&self, node: &DataNodeId, full_auto: bool) {
        if let Some(entry) = self.state.write().nodes.get_mut(node) {
            entry.full_auto = full_auto;
        }
    }

    /// Place an existing replica descriptor on its node (startup wiring for
    /// tests that construct descriptors by hand).
    pub fn register_replica(&self, node: &DataNodeId, replica: Arc<ReplicaDescriptor>) {
        if let Some(entry) = self.state.write().nodes.get_mut(node) {
            entry.replicas.push(replica);
        }
    }
}

impl ClusterMap for StaticClusterMap {
    fn replica_ids(&self, node: &DataNodeId) -> Vec<Arc<ReplicaDescriptor>> {
        self.state
            .read()
            .nodes
            .get(node)
            .map(|entry| entry.replicas.clone())
            .unwrap_or_default()
    }

    fn bootstrap_replica(
        &self,
        partition_name: &str,
        node: &DataNodeId,
    ) -> Option<Arc<ReplicaDescriptor>> {
        let partition_id = match partition_name.parse::<u64>() {
            Ok(id) => PartitionId(id),
            Err(_) => {
                warn!("Cannot allocate bootstrap replica: '{partition_name}' is not a partition name");
                return None;
            }
        };

        let mut state = self.state.write();
        let partition = match state.partitions.get(&partition_id) {
            Some(partition) => *partition,
            None => {
                warn!("Cannot allocate bootstrap replica: partition {partition_id} unknown");
                return None;
            }
        };
        let entry = match state.nodes.get_mut(node) {
            Some(entry) => entry,
            None => {
                warn!("Cannot allocate bootstrap replica: node {node} unknown");
                return None;
            }
        };

        if entry
            .replicas
            .iter()
            .any(|replica| replica.partition_id() == partition_id)
        {
            warn!("Node {node} already hosts a replica of partition {partition_id}");
            return None;
        }

        // Most-free disk that fits; the reservation is the caller's to
        // release if store creation fails.
        let disk = entry
            .disks
            .iter()
            .filter(|disk| disk.available_bytes() >= partition.capacity_bytes)
            .max_by_key(|disk| disk.available_bytes())
            .cloned()?;
        if !disk.try_reserve(partition.capacity_bytes) {
            return None;
        }

        let replica = Arc::new(ReplicaDescriptor::new(partition, disk));
        info!(
            "Allocated bootstrap replica of partition {partition_id} on {} ({})",
            node,
            replica.disk()
        );
        entry.replicas.push(replica.clone());
        Some(replica)
    }

    fn is_node_in_full_auto_mode(&self, node: &DataNodeId) -> bool {
        self.state
            .read()
            .nodes
            .get(node)
            .map(|entry| entry.full_auto)
            .unwrap_or(false)
    }
}
