//! Disk manager: owns every blob store resident on one mounted disk.

use crate::compaction::CompactionExecutor;
use crate::metrics::NodeMetrics;
use basalt_cluster::{Disk, PartitionId, ReplicaDescriptor, ReplicaStatusDelegate};
use basalt_store::{
    BlobStore, DiskManagerConfig, FileBlobStore, MountLock, StoreConfig, StoreError,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry::{Occupied, Vacant};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Clone)]
struct StoreEntry {
    replica: Arc<ReplicaDescriptor>,
    store: Arc<FileBlobStore>,
}

/// Control plane of one disk: store lifecycle, stop-state persistence,
/// compaction scheduling, and disk-level health.
pub struct DiskManager {
    disk: Arc<Disk>,
    store_config: StoreConfig,
    stores: DashMap<PartitionId, StoreEntry>,
    status_delegates: Vec<Arc<dyn ReplicaStatusDelegate>>,
    stopped_replicas: Mutex<HashSet<String>>,
    unexpected_dirs: Mutex<Vec<PathBuf>>,
    compaction: CompactionExecutor,
    running: AtomicBool,
    mount_lock: Mutex<Option<MountLock>>,
    metrics: Arc<NodeMetrics>,
}

impl DiskManager {
    pub fn new(
        disk: Arc<Disk>,
        replicas: Vec<Arc<ReplicaDescriptor>>,
        store_config: StoreConfig,
        disk_manager_config: &DiskManagerConfig,
        status_delegates: Vec<Arc<dyn ReplicaStatusDelegate>>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        let compaction = CompactionExecutor::new(
            disk.mount_path().display().to_string(),
            Duration::from_secs(disk_manager_config.compaction_check_interval_secs),
        );

        let stores = DashMap::new();
        for replica in replicas {
            let store = Arc::new(FileBlobStore::new(
                replica.path(),
                replica.partition_name(),
                store_config.clone(),
            ));
            compaction.register_store(replica.partition_id(), store.clone());
            stores.insert(replica.partition_id(), StoreEntry { replica, store });
        }

        Self {
            disk,
            store_config,
            stores,
            status_delegates,
            stopped_replicas: Mutex::new(HashSet::new()),
            unexpected_dirs: Mutex::new(Vec::new()),
            compaction,
            running: AtomicBool::new(false),
            mount_lock: Mutex::new(None),
            metrics,
        }
    }

    pub fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    /// Open all owned stores in parallel. Individual store failures leave
    /// that store down (its replica surfaces as ERROR through the
    /// coordinator) without failing the disk.
    #[tracing::instrument(level = "info", skip(self), fields(mount = %self.disk))]
    pub fn start(&self) -> Result<(), StoreError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Disk manager for {} already started", self.disk);
            return Ok(());
        }

        let mount_lock = match MountLock::acquire(self.disk.mount_path()) {
            Ok(lock) => lock,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *self.mount_lock.lock() = Some(mount_lock);

        self.load_stopped_replicas();

        let entries: Vec<StoreEntry> = self.stores.iter().map(|entry| entry.value().clone()).collect();
        let stopped = self.stopped_replicas.lock().clone();
        std::thread::scope(|scope| {
            for entry in &entries {
                let stopped = &stopped;
                scope.spawn(move || {
                    let name = entry.replica.partition_name();
                    if stopped.contains(&name) {
                        info!("Skipping start of stopped store for partition {name}");
                        return;
                    }
                    if let Err(e) = entry.store.start() {
                        self.metrics.record_store_start_failure();
                        error!("Failed to start store for partition {name}: {e}");
                    }
                });
            }
        });

        self.scan_unexpected_dirs();
        self.compaction.start();

        info!(
            "Disk manager for {} started: {} stores, {} up",
            self.disk,
            entries.len(),
            entries.iter().filter(|entry| entry.store.is_started()).count()
        );
        Ok(())
    }

    /// Close all stores and stop compaction. Individual failures are logged,
    /// never propagated.
    #[tracing::instrument(level = "info", skip(self), fields(mount = %self.disk))]
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.compaction.shutdown();

        let entries: Vec<StoreEntry> = self.stores.iter().map(|entry| entry.value().clone()).collect();
        std::thread::scope(|scope| {
            for entry in &entries {
                scope.spawn(move || {
                    if let Err(e) = entry.store.shutdown() {
                        error!(
                            "Failed to shut down store for partition {}: {e}",
                            entry.replica.partition_name()
                        );
                    }
                });
            }
        });

        *self.mount_lock.lock() = None;
        info!("Disk manager for {} shut down", self.disk);
    }

    pub fn get_store(
        &self,
        partition: PartitionId,
        skip_state_check: bool,
    ) -> Option<Arc<dyn BlobStore>> {
        let entry = self.stores.get(&partition)?;
        if skip_state_check || entry.store.is_started() {
            Some(entry.store.clone())
        } else {
            None
        }
    }

    pub fn has_store(&self, partition: PartitionId) -> bool {
        self.stores.contains_key(&partition)
    }

    pub fn replica(&self, partition: PartitionId) -> Option<Arc<ReplicaDescriptor>> {
        self.stores.get(&partition).map(|entry| entry.replica.clone())
    }

    /// Create and start a store for a dynamically added replica.
    pub fn add_blob_store(&self, replica: Arc<ReplicaDescriptor>) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            warn!(
                "Cannot add store for partition {}: disk manager for {} not running",
                replica.partition_name(),
                self.disk
            );
            return false;
        }

        match self.stores.entry(replica.partition_id()) {
            Occupied(_) => {
                warn!(
                    "Store for partition {} already exists on {}",
                    replica.partition_name(),
                    self.disk
                );
                false
            }
            Vacant(vacant) => {
                if let Err(e) = std::fs::create_dir_all(replica.path()) {
                    error!(
                        "Failed to create replica directory {}: {e}",
                        replica.path().display()
                    );
                    return false;
                }
                let store = Arc::new(FileBlobStore::new(
                    replica.path(),
                    replica.partition_name(),
                    self.store_config.clone(),
                ));
                if let Err(e) = store.start() {
                    self.metrics.record_store_start_failure();
                    error!(
                        "Failed to start store for new partition {}: {e}",
                        replica.partition_name()
                    );
                    return false;
                }
                self.compaction.register_store(replica.partition_id(), store.clone());
                vacant.insert(StoreEntry { replica, store });
                true
            }
        }
    }

    /// Shut the store down if started and delete its directory tree.
    pub fn remove_blob_store(&self, partition: PartitionId) -> Result<(), StoreError> {
        let entry = match self.stores.get(&partition) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(StoreError::StoreNotFound {
                    partition: partition.to_path_name(),
                });
            }
        };

        self.compaction.deregister_store(partition);
        if entry.store.is_started() {
            entry.store.shutdown()?;
        }
        self.stores.remove(&partition);

        std::fs::remove_dir_all(entry.replica.path())
            .map_err(|e| StoreError::from_io_error(e, "Failed to delete replica directory"))?;
        self.stopped_replicas
            .lock()
            .remove(&entry.replica.partition_name());

        info!(
            "Removed store for partition {} from {}",
            entry.replica.partition_name(),
            self.disk
        );
        Ok(())
    }

    pub fn start_blob_store(&self, partition: PartitionId) -> bool {
        let entry = match self.stores.get(&partition) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        if entry.store.is_started() {
            return true;
        }
        match entry.store.start() {
            Ok(()) => {
                self.stopped_replicas
                    .lock()
                    .remove(&entry.replica.partition_name());
                true
            }
            Err(e) => {
                error!(
                    "Failed to start store for partition {}: {e}",
                    entry.replica.partition_name()
                );
                false
            }
        }
    }

    pub fn shutdown_blob_store(&self, partition: PartitionId) -> bool {
        let entry = match self.stores.get(&partition) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        match entry.store.shutdown() {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to shut down store for partition {}: {e}",
                    entry.replica.partition_name()
                );
                false
            }
        }
    }

    /// Persist the stop flag through every replica-status delegate and keep
    /// the in-memory set aligned. Returns the partitions that could not be
    /// updated.
    pub fn set_blob_store_stopped_state(
        &self,
        partitions: &[PartitionId],
        stop: bool,
    ) -> Vec<PartitionId> {
        let mut failed = Vec::new();
        for &partition in partitions {
            let Some(replica) = self.replica(partition) else {
                failed.push(partition);
                continue;
            };

            let persisted = self
                .status_delegates
                .iter()
                .all(|delegate| delegate.set_stopped(std::slice::from_ref(&replica), stop));
            if !persisted {
                failed.push(partition);
                continue;
            }

            let mut stopped = self.stopped_replicas.lock();
            if stop {
                stopped.insert(replica.partition_name());
            } else {
                stopped.remove(&replica.partition_name());
            }
        }
        failed
    }

    pub fn schedule_next_for_compaction(&self, partition: PartitionId) -> bool {
        self.compaction.schedule_next(partition)
    }

    pub fn control_compaction_for_blob_store(&self, partition: PartitionId, enabled: bool) -> bool {
        self.compaction.control(partition, enabled)
    }

    pub fn is_compaction_executor_running(&self) -> bool {
        self.compaction.is_running()
    }

    pub fn are_all_stores_down(&self) -> bool {
        self.stores.iter().all(|entry| !entry.store.is_started())
    }

    /// Absolute paths under the mount that belong to no owned replica.
    pub fn unexpected_dirs(&self) -> Vec<PathBuf> {
        self.unexpected_dirs.lock().clone()
    }

    pub fn stopped_replicas(&self) -> HashSet<String> {
        self.stopped_replicas.lock().clone()
    }

    fn load_stopped_replicas(&self) {
        let owned: HashSet<String> = self
            .stores
            .iter()
            .map(|entry| entry.replica.partition_name())
            .collect();

        let mut stopped = self.stopped_replicas.lock();
        for delegate in &self.status_delegates {
            for name in delegate.stopped_replicas() {
                if owned.contains(&name) {
                    stopped.insert(name);
                }
            }
        }
        if !stopped.is_empty() {
            info!(
                "Disk {} has {} administratively stopped replicas",
                self.disk,
                stopped.len()
            );
        }
    }

    fn scan_unexpected_dirs(&self) {
        let owned: HashSet<String> = self
            .stores
            .iter()
            .map(|entry| entry.replica.partition_name())
            .collect();

        let entries = match std::fs::read_dir(self.disk.mount_path()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {} for unexpected directories: {e}", self.disk);
                return;
            }
        };

        let mut unexpected = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.starts_with('.')
                || name == self.disk.reserved_dir_name()
                || owned.contains(name)
            {
                continue;
            }
            debug!("Unexpected directory under {}: {}", self.disk, path.display());
            unexpected.push(path);
        }

        if !unexpected.is_empty() {
            warn!(
                "Found {} unexpected directories under {}",
                unexpected.len(),
                self.disk
            );
            self.metrics.record_unexpected_dirs(unexpected.len() as u64);
        }
        *self.unexpected_dirs.lock() = unexpected;
    }
}
