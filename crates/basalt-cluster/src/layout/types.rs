//! Cluster layout data structures.

use crate::{ClusterError, types::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub mount_path: String,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub port: u16,
    pub disks: Vec<DiskSpec>,
    #[serde(default)]
    pub full_auto: bool,
}

impl NodeSpec {
    pub fn id(&self) -> DataNodeId {
        DataNodeId::new(self.hostname.clone(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaPlacement {
    pub hostname: String,
    pub port: u16,
    pub mount_path: String,
}

impl ReplicaPlacement {
    pub fn node(&self) -> DataNodeId {
        DataNodeId::new(self.hostname.clone(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub id: PartitionId,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub state: PartitionState,
    pub replicas: Vec<ReplicaPlacement>,
}

/// Authoritative replica placement for the whole cluster, as written by the
/// coordinator and read by every node at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLayout {
    pub nodes: Vec<NodeSpec>,
    pub partitions: Vec<PartitionSpec>,
}

impl ClusterLayout {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            partitions: Vec::new(),
        }
    }

    pub fn get_node(&self, node: &DataNodeId) -> Result<&NodeSpec, ClusterError> {
        self.nodes
            .iter()
            .find(|spec| spec.hostname == node.hostname && spec.port == node.port)
            .ok_or(ClusterError::NodeNotFound {
                node: node.to_string(),
            })
    }

    pub fn get_partition(&self, id: PartitionId) -> Result<&PartitionSpec, ClusterError> {
        self.partitions
            .iter()
            .find(|spec| spec.id == id)
            .ok_or(ClusterError::ReplicaNotFound {
                partition: id.to_path_name(),
            })
    }

    /// Structural validation: every placement must name a known node and one
    /// of its disks.
    pub fn validate(&self) -> Result<(), ClusterError> {
        for partition in &self.partitions {
            for placement in &partition.replicas {
                let node = self.get_node(&placement.node()).map_err(|_| {
                    ClusterError::InvalidLayout {
                        context: format!("partition {}", partition.id),
                        reason: format!("placement names unknown node {}", placement.node()),
                    }
                })?;
                if !node
                    .disks
                    .iter()
                    .any(|disk| disk.mount_path == placement.mount_path)
                {
                    return Err(ClusterError::InvalidLayout {
                        context: format!("partition {}", partition.id),
                        reason: format!(
                            "placement names unknown mount '{}' on node {}",
                            placement.mount_path,
                            placement.node()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for ClusterLayout {
    fn default() -> Self {
        Self::new()
    }
}
