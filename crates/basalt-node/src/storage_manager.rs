//! Storage manager: the node-wide control plane over all disks and stores.

use crate::disk_manager::DiskManager;
use crate::metrics::NodeMetrics;
use crate::state_adapter::PartitionStateAdapter;
use basalt_cluster::{
    ClusterMap, ClusterParticipant, DataNodeId, Disk, ListenerType, PartitionId,
    ReplicaDescriptor, ReplicaStatusDelegate,
};
use basalt_store::{BlobStore, DiskManagerConfig, StoreConfig, StoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry::{Occupied, Vacant};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Local health of one partition, as reported to request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalPartitionStatus {
    NoError,
    DiskUnavailable,
    ReplicaUnavailable,
    PartitionUnknown,
}

/// Node-wide owner of every disk manager and replica mapping.
///
/// Holds three concurrent maps with a publish-after-success discipline:
/// `partition_to_disk_manager` is written only after the disk manager has
/// accepted the store, and pruned strictly before `partition_name_to_replica`
/// so readers never observe a store the disk manager does not own.
pub struct StorageManager {
    store_config: StoreConfig,
    disk_manager_config: DiskManagerConfig,
    cluster_map: Arc<dyn ClusterMap>,
    node_id: DataNodeId,
    participants: Vec<Arc<dyn ClusterParticipant>>,
    status_delegates: Vec<Arc<dyn ReplicaStatusDelegate>>,
    partition_to_disk_manager: DashMap<PartitionId, Arc<DiskManager>>,
    disk_to_disk_manager: DashMap<PathBuf, Arc<DiskManager>>,
    partition_name_to_replica: DashMap<String, Arc<ReplicaDescriptor>>,
    unexpected_dirs: Mutex<HashSet<PathBuf>>,
    metrics: Arc<NodeMetrics>,
    started: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl StorageManager {
    /// Build the manager from the cluster map's view of this node. Fails
    /// fast on invalid configuration. The first participant is the primary;
    /// only its listener will mutate store state.
    pub fn new(
        store_config: StoreConfig,
        disk_manager_config: DiskManagerConfig,
        cluster_map: Arc<dyn ClusterMap>,
        node_id: DataNodeId,
        participants: Vec<Arc<dyn ClusterParticipant>>,
    ) -> Result<Arc<Self>, StoreError> {
        store_config.validate()?;

        let metrics = Arc::new(NodeMetrics::new());
        let status_delegates: Vec<Arc<dyn ReplicaStatusDelegate>> = participants
            .iter()
            .filter_map(|participant| participant.replica_status_delegate())
            .collect();

        let manager = Self {
            store_config: store_config.clone(),
            disk_manager_config: disk_manager_config.clone(),
            cluster_map: cluster_map.clone(),
            node_id: node_id.clone(),
            participants,
            status_delegates: status_delegates.clone(),
            partition_to_disk_manager: DashMap::new(),
            disk_to_disk_manager: DashMap::new(),
            partition_name_to_replica: DashMap::new(),
            unexpected_dirs: Mutex::new(HashSet::new()),
            metrics: metrics.clone(),
            started: AtomicBool::new(false),
            started_at: Mutex::new(None),
        };

        // Group this node's replicas by disk; one manager per non-empty disk.
        let mut replicas_by_disk: HashMap<PathBuf, (Arc<Disk>, Vec<Arc<ReplicaDescriptor>>)> =
            HashMap::new();
        for replica in cluster_map.replica_ids(&node_id) {
            let (_, group) = replicas_by_disk
                .entry(replica.disk().mount_path().to_path_buf())
                .or_insert_with(|| (replica.disk().clone(), Vec::new()));
            group.push(replica);
        }

        for (mount, (disk, replicas)) in replicas_by_disk {
            let disk_manager = Arc::new(DiskManager::new(
                disk,
                replicas.clone(),
                store_config.clone(),
                &disk_manager_config,
                status_delegates.clone(),
                metrics.clone(),
            ));
            for replica in replicas {
                manager
                    .partition_to_disk_manager
                    .insert(replica.partition_id(), disk_manager.clone());
                manager
                    .partition_name_to_replica
                    .insert(replica.partition_name(), replica);
            }
            manager.disk_to_disk_manager.insert(mount, disk_manager);
        }

        info!(
            "Storage manager for {node_id} constructed: {} disks, {} replicas",
            manager.disk_to_disk_manager.len(),
            manager.partition_name_to_replica.len()
        );
        Ok(Arc::new(manager))
    }

    /// Start every disk manager on its own thread, then register with the
    /// cluster participants. A failed or panicked disk start is contained:
    /// its stores stay down while the rest of the node serves.
    #[tracing::instrument(level = "info", skip(self), fields(node = %self.node_id))]
    pub fn start(self: &Arc<Self>) -> Result<(), StoreError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Storage manager for {} already started", self.node_id);
            return Ok(());
        }

        let disk_managers: Vec<Arc<DiskManager>> = self
            .disk_to_disk_manager
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let handles: Vec<_> = disk_managers
            .into_iter()
            .map(|disk_manager| {
                std::thread::spawn(move || {
                    let mount = disk_manager.disk().to_string();
                    if let Err(e) = disk_manager.start() {
                        error!("Disk manager for {mount} failed to start: {e}");
                    }
                })
            })
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("A disk start worker panicked; continuing with remaining disks");
            }
        }

        for (index, participant) in self.participants.iter().enumerate() {
            let adapter = Arc::new(PartitionStateAdapter::new(
                Arc::downgrade(self),
                index == 0,
            ));
            participant
                .register_partition_state_change_listener(ListenerType::StorageManager, adapter);
        }

        let initial_partitions: HashSet<String> = self
            .partition_name_to_replica
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for participant in &self.participants {
            participant.set_initial_local_partitions(initial_partitions.clone());
        }

        {
            let mut unexpected = self.unexpected_dirs.lock();
            for entry in self.disk_to_disk_manager.iter() {
                unexpected.extend(entry.value().unexpected_dirs());
            }
        }

        *self.started_at.lock() = Some(Utc::now());
        info!("Storage manager for {} started", self.node_id);
        Ok(())
    }

    /// Shut every disk manager down on its own thread. Never fails on an
    /// individual disk.
    #[tracing::instrument(level = "info", skip(self), fields(node = %self.node_id))]
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let disk_managers: Vec<Arc<DiskManager>> = self
            .disk_to_disk_manager
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let handles: Vec<_> = disk_managers
            .into_iter()
            .map(|disk_manager| std::thread::spawn(move || disk_manager.shutdown()))
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("A disk shutdown worker panicked; continuing with remaining disks");
            }
        }
        info!("Storage manager for {} shut down", self.node_id);
    }

    pub fn get_store(
        &self,
        partition: PartitionId,
        skip_state_check: bool,
    ) -> Option<Arc<dyn BlobStore>> {
        self.partition_to_disk_manager
            .get(&partition)
            .and_then(|disk_manager| disk_manager.get_store(partition, skip_state_check))
    }

    pub fn get_replica(&self, partition_name: &str) -> Option<Arc<ReplicaDescriptor>> {
        self.partition_name_to_replica
            .get(partition_name)
            .map(|entry| entry.value().clone())
    }

    /// Read-only snapshot of the partitions this manager owns.
    pub fn local_partitions(&self) -> Vec<PartitionId> {
        self.partition_to_disk_manager
            .iter()
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn check_local_partition_status(
        &self,
        partition: PartitionId,
        local_replica: Option<&ReplicaDescriptor>,
    ) -> LocalPartitionStatus {
        if self.get_store(partition, false).is_some() {
            return LocalPartitionStatus::NoError;
        }
        match local_replica {
            Some(replica) => {
                if !self.is_disk_available(replica.disk()) {
                    LocalPartitionStatus::DiskUnavailable
                } else {
                    LocalPartitionStatus::ReplicaUnavailable
                }
            }
            None => LocalPartitionStatus::PartitionUnknown,
        }
    }

    /// A disk is available iff its manager exists and not all of its stores
    /// are down.
    pub fn is_disk_available(&self, disk: &Disk) -> bool {
        self.disk_to_disk_manager
            .get(disk.mount_path())
            .map(|disk_manager| !disk_manager.are_all_stores_down())
            .unwrap_or(false)
    }

    pub fn schedule_next_for_compaction(&self, partition: PartitionId) -> bool {
        self.partition_to_disk_manager
            .get(&partition)
            .map(|disk_manager| disk_manager.schedule_next_for_compaction(partition))
            .unwrap_or(false)
    }

    pub fn control_compaction_for_blob_store(
        &self,
        partition: PartitionId,
        enabled: bool,
    ) -> bool {
        self.partition_to_disk_manager
            .get(&partition)
            .map(|disk_manager| disk_manager.control_compaction_for_blob_store(partition, enabled))
            .unwrap_or(false)
    }

    pub fn start_blob_store(&self, partition: PartitionId) -> bool {
        self.partition_to_disk_manager
            .get(&partition)
            .map(|disk_manager| disk_manager.start_blob_store(partition))
            .unwrap_or(false)
    }

    pub fn shutdown_blob_store(&self, partition: PartitionId) -> bool {
        self.partition_to_disk_manager
            .get(&partition)
            .map(|disk_manager| disk_manager.shutdown_blob_store(partition))
            .unwrap_or(false)
    }

    /// Add a store for a replica this node did not previously host.
    ///
    /// The maps are written only after the disk manager reports success, so
    /// concurrent readers never observe a store the manager claims to own
    /// but the disk does not.
    pub fn add_blob_store(&self, replica: Arc<ReplicaDescriptor>) -> bool {
        let partition = replica.partition_id();
        if self.partition_to_disk_manager.contains_key(&partition) {
            warn!("Partition {partition} is already mapped on this node");
            return false;
        }

        let mount = replica.disk().mount_path().to_path_buf();
        let disk_manager = match self.disk_to_disk_manager.entry(mount) {
            Occupied(occupied) => occupied.get().clone(),
            Vacant(vacant) => {
                // New disk: create and start its manager before publishing it.
                let disk_manager = Arc::new(DiskManager::new(
                    replica.disk().clone(),
                    Vec::new(),
                    self.store_config.clone(),
                    &self.disk_manager_config,
                    self.status_delegates.clone(),
                    self.metrics.clone(),
                ));
                if let Err(e) = disk_manager.start() {
                    error!(
                        "Failed to start disk manager for new disk {}: {e}",
                        replica.disk()
                    );
                    return false;
                }
                vacant.insert(disk_manager).clone()
            }
        };

        if !disk_manager.add_blob_store(replica.clone()) {
            return false;
        }

        self.partition_to_disk_manager
            .insert(partition, disk_manager);
        self.partition_name_to_replica
            .insert(replica.partition_name(), replica);
        true
    }

    /// Remove the store and prune both maps: the partition map strictly
    /// before the name map.
    pub fn remove_blob_store(&self, partition: PartitionId) -> Result<(), StoreError> {
        let disk_manager = self
            .partition_to_disk_manager
            .get(&partition)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::StoreNotFound {
                partition: partition.to_path_name(),
            })?;

        disk_manager.remove_blob_store(partition)?;

        self.partition_to_disk_manager.remove(&partition);
        self.partition_name_to_replica
            .remove(&partition.to_path_name());
        Ok(())
    }

    /// Persist the stop flag for each partition through its disk manager.
    /// Returns the union of partitions that could not be updated.
    pub fn set_blob_store_stopped_state(
        &self,
        partitions: &[PartitionId],
        stop: bool,
    ) -> Vec<PartitionId> {
        let mut by_disk: HashMap<PathBuf, (Arc<DiskManager>, Vec<PartitionId>)> = HashMap::new();
        let mut failed = Vec::new();

        for &partition in partitions {
            match self.partition_to_disk_manager.get(&partition) {
                Some(entry) => {
                    let disk_manager = entry.value().clone();
                    by_disk
                        .entry(disk_manager.disk().mount_path().to_path_buf())
                        .or_insert_with(|| (disk_manager.clone(), Vec::new()))
                        .1
                        .push(partition);
                }
                None => failed.push(partition),
            }
        }

        for (_, (disk_manager, group)) in by_disk {
            failed.extend(disk_manager.set_blob_store_stopped_state(&group, stop));
        }
        failed
    }

    pub fn primary_participant(&self) -> Option<&Arc<dyn ClusterParticipant>> {
        self.participants.first()
    }

    pub fn cluster_map(&self) -> &Arc<dyn ClusterMap> {
        &self.cluster_map
    }

    pub fn node_id(&self) -> &DataNodeId {
        &self.node_id
    }

    pub fn store_config(&self) -> &StoreConfig {
        &self.store_config
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock()
    }

    /// Directories found under disk mounts at startup that no known replica
    /// owns. Consulted when a DROPPED transition arrives for a partition the
    /// node no longer maps.
    pub fn unexpected_dirs(&self) -> HashSet<PathBuf> {
        self.unexpected_dirs.lock().clone()
    }

    /// Delete any residual directory named after `partition_name` left under
    /// a disk mount by a crash mid-decommission. Returns whether one was
    /// deleted.
    pub fn delete_residual_dir(&self, partition_name: &str) -> Result<bool, StoreError> {
        let mut unexpected = self.unexpected_dirs.lock();
        let residual = unexpected
            .iter()
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name == partition_name)
            })
            .cloned();

        match residual {
            Some(path) => {
                std::fs::remove_dir_all(&path).map_err(|e| {
                    StoreError::from_io_error(e, "Failed to delete residual replica directory")
                })?;
                unexpected.remove(&path);
                info!("Deleted residual directory {}", path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
