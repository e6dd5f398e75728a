//! Partition state-change adapter: translates coordinator transitions into
//! storage-manager actions.
//!
//! One adapter is registered per participant. Only the primary adapter
//! mutates internal store state: the replication manager listens to the
//! primary alone, and a secondary overwriting store state could strand a
//! store in BOOTSTRAP.

use crate::storage_manager::StorageManager;
use basalt_cluster::{
    ListenerType, PartitionStateChangeListener, ReplicaDescriptor, ReplicaMarker, ReplicaState,
    StateTransitionError,
};
use basalt_store::{BlobStore, LOG_HEADER_SIZE};
use log::{info, warn};
use std::sync::{Arc, Weak};

pub struct PartitionStateAdapter {
    storage_manager: Weak<StorageManager>,
    is_primary: bool,
}

impl PartitionStateAdapter {
    pub fn new(storage_manager: Weak<StorageManager>, is_primary: bool) -> Self {
        Self {
            storage_manager,
            is_primary,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    fn manager(&self, partition_name: &str) -> Result<Arc<StorageManager>, StateTransitionError> {
        self.storage_manager.upgrade().ok_or_else(|| {
            StateTransitionError::operation_failure(partition_name, "storage manager is gone")
        })
    }

    fn finish(
        &self,
        result: Result<(), StateTransitionError>,
    ) -> Result<(), StateTransitionError> {
        if result.is_err() {
            if let Some(manager) = self.storage_manager.upgrade() {
                manager.metrics().record_state_transition_error();
            }
        }
        result
    }

    fn bootstrap_from_offline(&self, partition_name: &str) -> Result<(), StateTransitionError> {
        let manager = self.manager(partition_name)?;

        let store = match manager.get_replica(partition_name) {
            None => self.bootstrap_unknown_partition(&manager, partition_name)?,
            Some(replica) => self.bootstrap_known_partition(&manager, partition_name, &replica)?,
        };

        // Primary-only state write; a store already promoted past bootstrap
        // (regular reboot of a LEADER/STANDBY replica) keeps its state.
        if self.is_primary
            && !matches!(
                store.current_state(),
                ReplicaState::Leader | ReplicaState::Standby
            )
        {
            store.set_current_state(ReplicaState::Bootstrap);
        }
        Ok(())
    }

    /// Dynamic addition: the coordinator moved a brand-new replica here.
    fn bootstrap_unknown_partition(
        &self,
        manager: &Arc<StorageManager>,
        partition_name: &str,
    ) -> Result<Arc<dyn BlobStore>, StateTransitionError> {
        info!("Bootstrapping previously unknown partition {partition_name}");
        let replica = manager
            .cluster_map()
            .bootstrap_replica(partition_name, manager.node_id())
            .ok_or_else(|| {
                StateTransitionError::replica_not_found(
                    partition_name,
                    "cluster map has no bootstrap replica for this node",
                )
            })?;

        if !manager.add_blob_store(replica.clone()) {
            // The cluster map decremented the disk's available bytes when it
            // allocated; that bookkeeping must round-trip on failure.
            replica.disk().release(replica.capacity_bytes());
            return Err(StateTransitionError::operation_failure(
                partition_name,
                "failed to add blob store for new replica",
            ));
        }

        if let Some(primary) = manager.primary_participant() {
            match primary.update_data_node_info(&replica, true) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(StateTransitionError::cluster_update_failure(
                        partition_name,
                        "coordinator rejected data-node info update",
                    ));
                }
                Err(e) => {
                    return Err(StateTransitionError::cluster_update_failure(
                        partition_name,
                        format!("data-node info update failed: {e}"),
                    ));
                }
            }
        }

        manager
            .get_store(replica.partition_id(), true)
            .ok_or_else(|| {
                StateTransitionError::operation_failure(
                    partition_name,
                    "store missing after successful add",
                )
            })
    }

    /// Re-activation of a replica this node already hosts: regular reboot,
    /// retry after a transition failure, or a disk coming back.
    fn bootstrap_known_partition(
        &self,
        manager: &Arc<StorageManager>,
        partition_name: &str,
        replica: &Arc<ReplicaDescriptor>,
    ) -> Result<Arc<dyn BlobStore>, StateTransitionError> {
        let store = manager
            .get_store(replica.partition_id(), true)
            .ok_or_else(|| {
                StateTransitionError::store_not_started(partition_name, "store not present")
            })?;

        // A coordinator-driven migration can re-enter BOOTSTRAP from the
        // INACTIVE side; a stale decommission marker must not influence this
        // fresh bootstrap.
        if replica.has_marker(ReplicaMarker::DecommissionInProgress) {
            info!("Clearing stale decommission marker for partition {partition_name}");
            replica
                .remove_marker(ReplicaMarker::DecommissionInProgress)
                .map_err(|e| {
                    StateTransitionError::operation_failure(
                        partition_name,
                        format!("failed to remove decommission marker: {e}"),
                    )
                })?;
            store.set_recover_from_decommission(false);
        }

        let used_bytes = store.size_in_bytes().map_err(|e| {
            StateTransitionError::operation_failure(
                partition_name,
                format!("failed to read store size: {e}"),
            )
        })?;
        if used_bytes <= LOG_HEADER_SIZE {
            // Empty store: mark bootstrap-in-progress so a crash before the
            // first sync-up restarts bootstrap from scratch.
            replica
                .create_marker(ReplicaMarker::BootstrapInProgress)
                .map_err(|e| {
                    StateTransitionError::operation_failure(
                        partition_name,
                        format!("failed to create bootstrap marker: {e}"),
                    )
                })?;
        }
        Ok(store)
    }

    fn inactive_from_standby(&self, partition_name: &str) -> Result<(), StateTransitionError> {
        let manager = self.manager(partition_name)?;
        let replica = manager.get_replica(partition_name).ok_or_else(|| {
            StateTransitionError::replica_not_found(partition_name, "replica not on this node")
        })?;
        let store = manager
            .get_store(replica.partition_id(), true)
            .ok_or_else(|| {
                StateTransitionError::replica_not_found(partition_name, "store not present")
            })?;
        if store.is_disabled() {
            return Err(StateTransitionError::operation_failure(
                partition_name,
                "store is disabled",
            ));
        }
        if !store.is_started() {
            return Err(StateTransitionError::store_not_started(
                partition_name,
                "store is not started",
            ));
        }

        replica
            .create_marker(ReplicaMarker::DecommissionInProgress)
            .map_err(|e| {
                StateTransitionError::operation_failure(
                    partition_name,
                    format!("failed to create decommission marker: {e}"),
                )
            })?;

        if self.is_primary {
            store.set_current_state(ReplicaState::Inactive);
        }

        // A decommissioning store must not churn its log underneath the
        // peers syncing from it.
        if !manager.control_compaction_for_blob_store(replica.partition_id(), false) {
            return Err(StateTransitionError::replica_not_found(
                partition_name,
                "disk manager no longer owns the partition",
            ));
        }
        Ok(())
    }

    fn dropped_from_offline(&self, partition_name: &str) -> Result<(), StateTransitionError> {
        let manager = self.manager(partition_name)?;

        let Some(replica) = manager.get_replica(partition_name) else {
            // The coordinator may have already removed the replica from its
            // own config before this node crashed mid-decommission; purge
            // whatever directory is left.
            let deleted = manager.delete_residual_dir(partition_name).map_err(|e| {
                StateTransitionError::operation_failure(
                    partition_name,
                    format!("failed to delete residual directory: {e}"),
                )
            })?;
            if deleted {
                info!("Dropped residual directory of departed partition {partition_name}");
            } else {
                warn!("DROPPED for unknown partition {partition_name} with no residue");
            }
            return Ok(());
        };

        let partition = replica.partition_id();
        let store = manager.get_store(partition, true).ok_or_else(|| {
            StateTransitionError::replica_not_found(partition_name, "store not present")
        })?;

        let full_auto_short_circuit = manager
            .cluster_map()
            .is_node_in_full_auto_mode(manager.node_id())
            && store.previous_state() == ReplicaState::Offline
            && manager
                .store_config()
                .full_auto_resume_on_offline_previous_state;
        if store.recover_from_decommission() || full_auto_short_circuit {
            info!("Resuming interrupted decommission of partition {partition_name}");
            self.resume_decommission(&manager, partition_name)
                .map_err(|e| {
                    manager.metrics().record_resume_decommission_error();
                    StateTransitionError::operation_failure(
                        partition_name,
                        format!("resume decommission failed: {e}"),
                    )
                })?;
        }

        if !manager.shutdown_blob_store(partition) {
            return Err(StateTransitionError::operation_failure(
                partition_name,
                "failed to shut down store",
            ));
        }

        if let Some(primary) = manager.primary_participant() {
            match primary.update_data_node_info(&replica, false) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(StateTransitionError::cluster_update_failure(
                        partition_name,
                        "coordinator rejected data-node info removal",
                    ));
                }
                Err(e) => {
                    return Err(StateTransitionError::cluster_update_failure(
                        partition_name,
                        format!("data-node info removal failed: {e}"),
                    ));
                }
            }

            // Stats first, then replication; both propagate unchanged.
            let listeners = primary.partition_state_change_listeners();
            if let Some(stats) = listeners.get(&ListenerType::StatsManager) {
                stats.on_become_dropped_from_offline(partition_name)?;
            }
            if let Some(replication) = listeners.get(&ListenerType::ReplicationManager) {
                replication.on_become_dropped_from_offline(partition_name)?;
            }
        }

        manager.remove_blob_store(partition).map_err(|e| {
            StateTransitionError::operation_failure(
                partition_name,
                format!("failed to remove blob store: {e}"),
            )
        })?;

        info!("Partition {partition_name} dropped from this node");
        Ok(())
    }

    /// Re-run the decommission sequence for a replica whose INACTIVE ->
    /// OFFLINE path was cut short (crash, or a full-auto coordinator going
    /// straight to DROPPED).
    fn resume_decommission(
        &self,
        manager: &Arc<StorageManager>,
        partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        self.inactive_from_standby(partition_name)?;

        let primary = manager.primary_participant().ok_or_else(|| {
            StateTransitionError::operation_failure(
                partition_name,
                "no primary participant to drive decommission",
            )
        })?;
        let listeners = primary.partition_state_change_listeners();
        let replication = listeners
            .get(&ListenerType::ReplicationManager)
            .ok_or_else(|| {
                StateTransitionError::operation_failure(
                    partition_name,
                    "no replication manager listener registered",
                )
            })?;
        let sync_up = primary.replica_sync_up_manager().ok_or_else(|| {
            StateTransitionError::operation_failure(
                partition_name,
                "primary participant has no sync-up manager",
            )
        })?;

        replication.on_become_inactive_from_standby(partition_name)?;
        sync_up
            .wait_deactivation_completed(partition_name)
            .map_err(|e| {
                StateTransitionError::operation_failure(
                    partition_name,
                    format!("deactivation wait failed: {e}"),
                )
            })?;

        replication.on_become_offline_from_inactive(partition_name)?;
        sync_up
            .wait_disconnection_completed(partition_name)
            .map_err(|e| {
                StateTransitionError::operation_failure(
                    partition_name,
                    format!("disconnection wait failed: {e}"),
                )
            })?;

        self.offline_from_inactive(partition_name)
    }

    fn offline_from_inactive(&self, _partition_name: &str) -> Result<(), StateTransitionError> {
        // The replication manager tears down its links; nothing to do here.
        Ok(())
    }
}

impl PartitionStateChangeListener for PartitionStateAdapter {
    #[tracing::instrument(level = "info", skip(self), fields(primary = self.is_primary))]
    fn on_become_bootstrap_from_offline(
        &self,
        partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        let result = self.bootstrap_from_offline(partition_name);
        self.finish(result)
    }

    #[tracing::instrument(level = "info", skip(self), fields(primary = self.is_primary))]
    fn on_become_inactive_from_standby(
        &self,
        partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        let result = self.inactive_from_standby(partition_name);
        self.finish(result)
    }

    fn on_become_offline_from_inactive(
        &self,
        partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        self.offline_from_inactive(partition_name)
    }

    #[tracing::instrument(level = "info", skip(self), fields(primary = self.is_primary))]
    fn on_become_dropped_from_offline(
        &self,
        partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        let result = self.dropped_from_offline(partition_name);
        self.finish(result)
    }
}
