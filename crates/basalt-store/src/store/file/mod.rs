//! File-backed blob store.

pub mod blob_log;

pub use blob_log::{BlobLocation, BlobLog, EntryKind, LOG_HEADER_SIZE, RecoveredEntry};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::store::BlobStore;
use basalt_cluster::{ReplicaMarker, ReplicaState};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const LOG_CURRENT: &str = "log_current";
const LOG_COMPACTING: &str = "log_compacting";

#[derive(Debug)]
struct StoreRuntime {
    log: BlobLog,
    index: HashMap<String, BlobLocation>,
    reclaimable_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct StoreStates {
    current: ReplicaState,
    previous: ReplicaState,
}

/// Blob store backed by a single append-only log in the replica directory.
///
/// Shared behind an `Arc` between the disk manager, compaction executor, and
/// state-transition callbacks; all mutation goes through interior locks.
pub struct FileBlobStore {
    replica_dir: PathBuf,
    partition_name: String,
    config: StoreConfig,
    runtime: RwLock<Option<StoreRuntime>>,
    disabled: AtomicBool,
    shutting_down: AtomicBool,
    recover_from_decommission: AtomicBool,
    states: Mutex<StoreStates>,
}

impl FileBlobStore {
    pub fn new(
        replica_dir: impl Into<PathBuf>,
        partition_name: impl Into<String>,
        config: StoreConfig,
    ) -> Self {
        Self {
            replica_dir: replica_dir.into(),
            partition_name: partition_name.into(),
            config,
            runtime: RwLock::new(None),
            disabled: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            recover_from_decommission: AtomicBool::new(false),
            states: Mutex::new(StoreStates {
                current: ReplicaState::Offline,
                previous: ReplicaState::Offline,
            }),
        }
    }

    pub fn partition_name(&self) -> &str {
        &self.partition_name
    }

    pub fn replica_dir(&self) -> &Path {
        &self.replica_dir
    }

    fn log_path(&self) -> PathBuf {
        self.replica_dir.join(LOG_CURRENT)
    }

    fn compacting_path(&self) -> PathBuf {
        self.replica_dir.join(LOG_COMPACTING)
    }

    fn open_or_create_log(&self) -> Result<(BlobLog, Vec<RecoveredEntry>), StoreError> {
        if self.log_path().exists() {
            BlobLog::recover(&self.log_path())
        } else {
            BlobLog::create(&self.log_path()).map(|log| (log, Vec::new()))
        }
    }

    fn ensure_not_shutting_down(&self) -> Result<(), StoreError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(StoreError::StoreShuttingDown {
                context: self.partition_name.clone(),
            });
        }
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    #[tracing::instrument(level = "info", skip(self), fields(partition = %self.partition_name))]
    fn start(&self) -> Result<(), StoreError> {
        let mut runtime = self.runtime.write();
        if runtime.is_some() {
            return Err(StoreError::StoreAlreadyStarted {
                context: self.partition_name.clone(),
            });
        }

        std::fs::create_dir_all(&self.replica_dir)
            .map_err(|e| StoreError::from_io_error(e, "Failed to create replica directory"))?;

        // A leftover compacting log means a crash mid-compaction; the current
        // log is still authoritative.
        if self.compacting_path().exists() {
            warn!(
                "Discarding incomplete compaction output for partition {}",
                self.partition_name
            );
            std::fs::remove_file(self.compacting_path()).map_err(|e| {
                StoreError::from_io_error(e, "Failed to remove stale compacting log")
            })?;
        }

        let (blob_log, entries) = self.open_or_create_log()?;

        let mut index: HashMap<String, BlobLocation> = HashMap::new();
        let mut reclaimable_bytes = 0u64;
        for entry in &entries {
            match entry.kind {
                EntryKind::Put => {
                    if let Some(superseded) = index.insert(entry.key.clone(), entry.into()) {
                        reclaimable_bytes += superseded.entry_size;
                    }
                }
                EntryKind::Tombstone => {
                    if let Some(deleted) = index.remove(&entry.key) {
                        reclaimable_bytes += deleted.entry_size;
                    }
                    reclaimable_bytes += entry.entry_size;
                }
            }
        }

        let decommission_marker = self
            .replica_dir
            .join(ReplicaMarker::DecommissionInProgress.file_name());
        if decommission_marker.exists() {
            info!(
                "Partition {} has an unfinished decommission on disk",
                self.partition_name
            );
            self.recover_from_decommission.store(true, Ordering::SeqCst);
        }

        info!(
            "Started store for partition {}: {} blobs, {} bytes ({} reclaimable)",
            self.partition_name,
            index.len(),
            blob_log.size_bytes(),
            reclaimable_bytes
        );
        *runtime = Some(StoreRuntime {
            log: blob_log,
            index,
            reclaimable_bytes,
        });
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(partition = %self.partition_name))]
    fn shutdown(&self) -> Result<(), StoreError> {
        // Flag the shutdown before taking the lock so blob operations racing
        // in behind us are turned away instead of queueing on a dying store.
        self.shutting_down.store(true, Ordering::SeqCst);
        let mut runtime = self.runtime.write();
        let result = match runtime.take() {
            Some(state) => state.log.sync().map(|()| {
                info!("Shut down store for partition {}", self.partition_name);
            }),
            None => {
                debug!(
                    "Store for partition {} already shut down",
                    self.partition_name
                );
                Ok(())
            }
        };
        self.shutting_down.store(false, Ordering::SeqCst);
        result
    }

    fn is_started(&self) -> bool {
        self.runtime.read().is_some()
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    fn size_in_bytes(&self) -> Result<u64, StoreError> {
        if let Some(runtime) = self.runtime.read().as_ref() {
            return Ok(runtime.log.size_bytes());
        }
        match std::fs::metadata(self.log_path()) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StoreError::from_read_error(e, "Failed to stat blob log")),
        }
    }

    fn current_state(&self) -> ReplicaState {
        self.states.lock().current
    }

    fn set_current_state(&self, state: ReplicaState) {
        let mut states = self.states.lock();
        debug!(
            "Partition {} state {} -> {state}",
            self.partition_name, states.current
        );
        states.previous = states.current;
        states.current = state;
    }

    fn previous_state(&self) -> ReplicaState {
        self.states.lock().previous
    }

    fn recover_from_decommission(&self) -> bool {
        self.recover_from_decommission.load(Ordering::SeqCst)
    }

    fn set_recover_from_decommission(&self, recover: bool) {
        self.recover_from_decommission.store(recover, Ordering::SeqCst);
    }

    #[tracing::instrument(level = "debug", skip(self), fields(partition = %self.partition_name))]
    fn compact(&self) -> Result<u64, StoreError> {
        self.ensure_not_shutting_down()?;
        let mut guard = self.runtime.write();
        let runtime = guard.as_mut().ok_or_else(|| StoreError::StoreNotStarted {
            context: self.partition_name.clone(),
        })?;

        if runtime.reclaimable_bytes == 0 {
            return Ok(0);
        }

        let old_size = runtime.log.size_bytes();
        runtime.log.sync()?;

        if self.compacting_path().exists() {
            std::fs::remove_file(self.compacting_path()).map_err(|e| {
                StoreError::from_io_error(e, "Failed to remove stale compacting log")
            })?;
        }

        // Rewrite live entries in log order so relative placement survives.
        let mut live: Vec<(&String, &BlobLocation)> = runtime.index.iter().collect();
        live.sort_by_key(|(_, location)| location.entry_offset);

        let mut compacted = BlobLog::create(&self.compacting_path())?;
        for (key, location) in live {
            let value = runtime.log.read_value(*location)?;
            compacted.append_put(key, &value)?;
        }
        compacted.sync()?;
        drop(compacted);

        std::fs::rename(self.compacting_path(), self.log_path())
            .map_err(|e| StoreError::from_io_error(e, "Failed to swap compacted log"))?;

        let (blob_log, entries) = BlobLog::recover(&self.log_path())?;
        let index = entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.into()))
            .collect();
        let new_size = blob_log.size_bytes();
        *runtime = StoreRuntime {
            log: blob_log,
            index,
            reclaimable_bytes: 0,
        };

        let reclaimed = old_size.saturating_sub(new_size);
        info!(
            "Compacted partition {}: reclaimed {reclaimed} bytes",
            self.partition_name
        );
        Ok(reclaimed)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.ensure_not_shutting_down()?;
        if self.is_disabled() {
            return Err(StoreError::StoreDisabled {
                context: self.partition_name.clone(),
            });
        }
        let mut guard = self.runtime.write();
        let runtime = guard.as_mut().ok_or_else(|| StoreError::StoreNotStarted {
            context: self.partition_name.clone(),
        })?;

        let location = runtime.log.append_put(key, value)?;
        if let Some(superseded) = runtime.index.insert(key.to_string(), location) {
            runtime.reclaimable_bytes += superseded.entry_size;
        }
        if self.config.flush_interval_secs == 0 {
            runtime.log.sync()?;
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.ensure_not_shutting_down()?;
        if self.is_disabled() {
            return Err(StoreError::StoreDisabled {
                context: self.partition_name.clone(),
            });
        }
        let guard = self.runtime.read();
        let runtime = guard.as_ref().ok_or_else(|| StoreError::StoreNotStarted {
            context: self.partition_name.clone(),
        })?;

        let location = runtime
            .index
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::BlobNotFound {
                key: key.to_string(),
            })?;
        runtime.log.read_value(location)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_not_shutting_down()?;
        if self.is_disabled() {
            return Err(StoreError::StoreDisabled {
                context: self.partition_name.clone(),
            });
        }
        let mut guard = self.runtime.write();
        let runtime = guard.as_mut().ok_or_else(|| StoreError::StoreNotStarted {
            context: self.partition_name.clone(),
        })?;

        let deleted = runtime
            .index
            .remove(key)
            .ok_or_else(|| StoreError::BlobNotFound {
                key: key.to_string(),
            })?;
        let tombstone = runtime.log.append_tombstone(key)?;
        runtime.reclaimable_bytes += deleted.entry_size + tombstone.entry_size;
        if self.config.flush_interval_secs == 0 {
            runtime.log.sync()?;
        }
        Ok(())
    }
}
