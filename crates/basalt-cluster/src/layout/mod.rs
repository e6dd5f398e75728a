//! Cluster layout: the serialized placement of disks and replicas that the
//! coordinator publishes and every node reads at startup.

pub mod loader;
pub mod types;

pub use loader::LayoutLoader;
pub use types::{ClusterLayout, DiskSpec, NodeSpec, PartitionSpec, ReplicaPlacement};
