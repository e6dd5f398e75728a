//! Cluster participant: the node's client of the cluster-coordination
//! service. It delivers partition state transitions to registered listeners
//! and writes this node's hosted-partition set back to the coordinator.

use crate::error::{ClusterError, StateTransitionError};
use crate::listener::{ListenerType, PartitionStateChangeListener, PartitionStateTransition};
use crate::sync_up::ReplicaSyncUpManager;
use crate::types::{DataNodeId, ReplicaDescriptor};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-participant persistence hook for administratively stopped replicas.
pub trait ReplicaStatusDelegate: Send + Sync {
    /// Partition names whose replicas are marked stopped on this node.
    fn stopped_replicas(&self) -> Vec<String>;

    /// Persist the stop flag for the given replicas. Returns false if the
    /// update could not be recorded.
    fn set_stopped(&self, replicas: &[Arc<ReplicaDescriptor>], stopped: bool) -> bool;
}

/// The interface a cluster-coordination client exposes to the node.
///
/// The first participant registered on a node is the *primary*: it supplies
/// the replica sync-up manager and is the only one whose storage listener may
/// mutate internal store state.
pub trait ClusterParticipant: Send + Sync {
    fn register_partition_state_change_listener(
        &self,
        listener_type: ListenerType,
        listener: Arc<dyn PartitionStateChangeListener>,
    );

    /// Seed the coordinator with the set of partitions this node hosts at
    /// startup.
    fn set_initial_local_partitions(&self, partitions: HashSet<String>);

    /// Add or remove one partition from this node's entry in the cluster.
    /// `Ok(false)` means the coordinator rejected the update; `Err` carries
    /// an illegal-state signal.
    fn update_data_node_info(
        &self,
        replica: &ReplicaDescriptor,
        add: bool,
    ) -> Result<bool, ClusterError>;

    /// The sync-up manager, present on the primary participant only.
    fn replica_sync_up_manager(&self) -> Option<Arc<dyn ReplicaSyncUpManager>>;

    fn partition_state_change_listeners(
        &self,
    ) -> HashMap<ListenerType, Arc<dyn PartitionStateChangeListener>>;

    fn replica_status_delegate(&self) -> Option<Arc<dyn ReplicaStatusDelegate>>;
}

/// Failure modes tests and operators can inject into
/// [`LocalParticipant::update_data_node_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFailureMode {
    /// The coordinator returns an unsuccessful result.
    Rejected,
    /// The participant raises an illegal-state signal.
    IllegalState,
}

/// In-process participant implementation.
///
/// Keeps the coordinator-visible state (hosted partitions, stopped replicas)
/// in memory and dispatches transitions synchronously to registered
/// listeners, serialized per partition the way a real coordinator client
/// would deliver them.
pub struct LocalParticipant {
    node: DataNodeId,
    listeners: RwLock<HashMap<ListenerType, Arc<dyn PartitionStateChangeListener>>>,
    local_partitions: Mutex<HashSet<String>>,
    sync_up: Option<Arc<dyn ReplicaSyncUpManager>>,
    status_delegate: Arc<InMemoryStatusDelegate>,
    update_failure: Mutex<Option<UpdateFailureMode>>,
    transition_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalParticipant {
    pub fn new(node: DataNodeId, sync_up: Option<Arc<dyn ReplicaSyncUpManager>>) -> Self {
        Self {
            node,
            listeners: RwLock::new(HashMap::new()),
            local_partitions: Mutex::new(HashSet::new()),
            sync_up,
            status_delegate: Arc::new(InMemoryStatusDelegate::new()),
            update_failure: Mutex::new(None),
            transition_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn node(&self) -> &DataNodeId {
        &self.node
    }

    /// Partitions currently recorded for this node in the coordinator.
    pub fn local_partitions(&self) -> HashSet<String> {
        self.local_partitions.lock().clone()
    }

    /// Inject a failure mode for the next `update_data_node_info` calls
    /// (None restores normal behavior).
    pub fn set_update_failure_mode(&self, mode: Option<UpdateFailureMode>) {
        *self.update_failure.lock() = mode;
    }

    pub fn status_delegate_handle(&self) -> Arc<InMemoryStatusDelegate> {
        self.status_delegate.clone()
    }

    fn partition_lock(&self, partition_name: &str) -> Arc<Mutex<()>> {
        self.transition_locks
            .lock()
            .entry(partition_name.to_string())
            .or_default()
            .clone()
    }

    /// Deliver one transition to the registered listeners, storage manager
    /// first, then replication, then stats. Within a partition transitions
    /// are serialized; across partitions they interleave freely.
    ///
    /// OFFLINE->DROPPED goes to the storage-manager listener alone: its drop
    /// sequence invokes the stats and replication listeners itself, in the
    /// order the decommission contract requires.
    pub fn transition(
        &self,
        partition_name: &str,
        transition: PartitionStateTransition,
    ) -> Result<(), StateTransitionError> {
        let lock = self.partition_lock(partition_name);
        let _guard = lock.lock();
        debug!("Delivering {transition} for partition {partition_name} on {}", self.node);

        let ordered: &[ListenerType] = if transition == PartitionStateTransition::OfflineToDropped {
            &[ListenerType::StorageManager]
        } else {
            &[
                ListenerType::StorageManager,
                ListenerType::ReplicationManager,
                ListenerType::StatsManager,
            ]
        };
        let listeners = self.listeners.read().clone();
        for listener_type in ordered {
            if let Some(listener) = listeners.get(listener_type) {
                listener.on_transition(transition, partition_name)?;
            }
        }
        Ok(())
    }
}

impl ClusterParticipant for LocalParticipant {
    fn register_partition_state_change_listener(
        &self,
        listener_type: ListenerType,
        listener: Arc<dyn PartitionStateChangeListener>,
    ) {
        info!("Registering {listener_type} state-change listener on {}", self.node);
        self.listeners.write().insert(listener_type, listener);
    }

    fn set_initial_local_partitions(&self, partitions: HashSet<String>) {
        info!(
            "Seeding {} with {} local partitions",
            self.node,
            partitions.len()
        );
        *self.local_partitions.lock() = partitions;
    }

    fn update_data_node_info(
        &self,
        replica: &ReplicaDescriptor,
        add: bool,
    ) -> Result<bool, ClusterError> {
        match *self.update_failure.lock() {
            Some(UpdateFailureMode::Rejected) => return Ok(false),
            Some(UpdateFailureMode::IllegalState) => {
                return Err(ClusterError::IllegalState {
                    context: format!("data-node info update on {}", self.node),
                });
            }
            None => {}
        }

        let name = replica.partition_name();
        let mut partitions = self.local_partitions.lock();
        if add {
            partitions.insert(name);
        } else {
            partitions.remove(&name);
        }
        Ok(true)
    }

    fn replica_sync_up_manager(&self) -> Option<Arc<dyn ReplicaSyncUpManager>> {
        self.sync_up.clone()
    }

    fn partition_state_change_listeners(
        &self,
    ) -> HashMap<ListenerType, Arc<dyn PartitionStateChangeListener>> {
        self.listeners.read().clone()
    }

    fn replica_status_delegate(&self) -> Option<Arc<dyn ReplicaStatusDelegate>> {
        Some(self.status_delegate.clone())
    }
}

/// Stop-state persistence backed by participant memory. A coordinator-backed
/// delegate would write the same set into the cluster instead.
#[derive(Default)]
pub struct InMemoryStatusDelegate {
    stopped: Mutex<HashSet<String>>,
    fail_updates: AtomicBool,
}

impl InMemoryStatusDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `set_stopped` calls fail (tests).
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

impl ReplicaStatusDelegate for InMemoryStatusDelegate {
    fn stopped_replicas(&self) -> Vec<String> {
        self.stopped.lock().iter().cloned().collect()
    }

    fn set_stopped(&self, replicas: &[Arc<ReplicaDescriptor>], stopped: bool) -> bool {
        if self.fail_updates.load(Ordering::SeqCst) {
            return false;
        }
        let mut set = self.stopped.lock();
        for replica in replicas {
            if stopped {
                set.insert(replica.partition_name());
            } else {
                set.remove(&replica.partition_name());
            }
        }
        true
    }
}
