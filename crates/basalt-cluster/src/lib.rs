//! Basalt cluster model.
//!
//! This crate provides the cluster-side model a storage node works against:
//! partition/replica/disk identities, the published cluster layout, and the
//! collaborator surfaces of the coordination service (cluster map,
//! participant, replica sync-up barriers, stop-state delegates, and the
//! partition state-change listener interface).

pub mod cluster_map;
pub mod error;
pub mod layout;
pub mod listener;
pub mod participant;
pub mod sync_up;
pub mod types;

pub use error::{ClusterError, StateTransitionError, StateTransitionErrorKind};

// Re-export the collaborator traits and their in-process implementations
pub use cluster_map::{ClusterMap, StaticClusterMap};
pub use layout::{ClusterLayout, LayoutLoader};
pub use listener::{ListenerType, PartitionStateChangeListener, PartitionStateTransition};
pub use participant::{
    ClusterParticipant, InMemoryStatusDelegate, LocalParticipant, ReplicaStatusDelegate,
    UpdateFailureMode,
};
pub use sync_up::{LatchSyncUpManager, ReplicaSyncUpManager};
pub use types::{
    DataNodeId, Disk, Partition, PartitionId, PartitionState, ReplicaDescriptor, ReplicaMarker,
    ReplicaState,
};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
