//! Core types for the cluster model: partitions, replicas, disks, nodes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier of a partition. The decimal rendering doubles as the
/// replica directory name on every disk that hosts a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl PartitionId {
    pub fn new(id: u64) -> Self {
        PartitionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Path-style name of the partition, used as its on-disk directory name.
    pub fn to_path_name(&self) -> String {
        self.0.to_string()
    }
}

impl From<u64> for PartitionId {
    fn from(id: u64) -> Self {
        PartitionId(id)
    }
}

impl From<PartitionId> for u64 {
    fn from(id: PartitionId) -> Self {
        id.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster-wide partition state. Informational on the node; the coordinator
/// owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    #[default]
    ReadWrite,
    ReadOnly,
    Offline,
}

/// Identity of a replicated unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub capacity_bytes: u64,
    pub state: PartitionState,
}

impl Partition {
    pub fn new(id: PartitionId, capacity_bytes: u64) -> Self {
        Self {
            id,
            capacity_bytes,
            state: PartitionState::ReadWrite,
        }
    }
}

/// Identity of a data node in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataNodeId {
    pub hostname: String,
    pub port: u16,
}

impl DataNodeId {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for DataNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Lifecycle state of one replica on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    Offline,
    Bootstrap,
    Standby,
    Leader,
    Inactive,
    Dropped,
    Error,
}

impl fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicaState::Offline => "OFFLINE",
            ReplicaState::Bootstrap => "BOOTSTRAP",
            ReplicaState::Standby => "STANDBY",
            ReplicaState::Leader => "LEADER",
            ReplicaState::Inactive => "INACTIVE",
            ReplicaState::Dropped => "DROPPED",
            ReplicaState::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// A physical mount point hosting replicas.
///
/// Available bytes are decreased when a replica is allocated onto the disk
/// and restored if that allocation fails downstream. The invariant
/// `available <= raw` always holds.
#[derive(Debug)]
pub struct Disk {
    mount_path: PathBuf,
    raw_capacity_bytes: u64,
    available_bytes: AtomicU64,
    reserved_dir_name: String,
}

impl Disk {
    pub fn new(
        mount_path: impl Into<PathBuf>,
        raw_capacity_bytes: u64,
        reserved_dir_name: impl Into<String>,
    ) -> Self {
        Self {
            mount_path: mount_path.into(),
            raw_capacity_bytes,
            available_bytes: AtomicU64::new(raw_capacity_bytes),
            reserved_dir_name: reserved_dir_name.into(),
        }
    }

    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    pub fn raw_capacity_bytes(&self) -> u64 {
        self.raw_capacity_bytes
    }

    pub fn available_bytes(&self) -> u64 {
        self.available_bytes.load(Ordering::SeqCst)
    }

    pub fn reserved_dir_name(&self) -> &str {
        &self.reserved_dir_name
    }

    /// Reserve `bytes` of capacity. Returns false without changing anything
    /// if the disk does not have that much available.
    pub fn try_reserve(&self, bytes: u64) -> bool {
        let mut current = self.available_bytes.load(Ordering::SeqCst);
        loop {
            if current < bytes {
                return false;
            }
            match self.available_bytes.compare_exchange(
                current,
                current - bytes,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Return `bytes` of previously reserved capacity, clamped so available
    /// never exceeds raw.
    pub fn release(&self, bytes: u64) {
        let mut current = self.available_bytes.load(Ordering::SeqCst);
        loop {
            let restored = current.saturating_add(bytes).min(self.raw_capacity_bytes);
            match self.available_bytes.compare_exchange(
                current,
                restored,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl PartialEq for Disk {
    fn eq(&self, other: &Self) -> bool {
        self.mount_path == other.mount_path
    }
}

impl Eq for Disk {}

impl std::hash::Hash for Disk {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.mount_path.hash(state);
    }
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mount_path.display())
    }
}

/// Crash-safe marker files in a replica directory. Zero-byte; their presence
/// survives process death where in-memory flags do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaMarker {
    BootstrapInProgress,
    DecommissionInProgress,
}

impl ReplicaMarker {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReplicaMarker::BootstrapInProgress => "bootstrap_in_progress",
            ReplicaMarker::DecommissionInProgress => "decommission_in_progress",
        }
    }
}

/// This node's copy of a partition: placed on exactly one disk, with its
/// directory directly under the disk mount.
#[derive(Debug)]
pub struct ReplicaDescriptor {
    partition: Partition,
    disk: Arc<Disk>,
    path: PathBuf,
}

impl ReplicaDescriptor {
    pub fn new(partition: Partition, disk: Arc<Disk>) -> Self {
        let path = disk.mount_path().join(partition.id.to_path_name());
        Self {
            partition,
            disk,
            path,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition.id
    }

    pub fn partition_name(&self) -> String {
        self.partition.id.to_path_name()
    }

    pub fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.partition.capacity_bytes
    }

    pub fn marker_path(&self, marker: ReplicaMarker) -> PathBuf {
        self.path.join(marker.file_name())
    }

    pub fn has_marker(&self, marker: ReplicaMarker) -> bool {
        self.marker_path(marker).exists()
    }

    /// Create the marker file. Idempotent: an existing marker is left as-is.
    pub fn create_marker(&self, marker: ReplicaMarker) -> std::io::Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.marker_path(marker))
            .map(|_| ())
    }

    /// Remove the marker file. Idempotent: a missing marker is not an error.
    pub fn remove_marker(&self, marker: ReplicaMarker) -> std::io::Result<()> {
        match std::fs::remove_file(self.marker_path(marker)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for ReplicaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "replica[partition={}, path={}]",
            self.partition.id,
            self.path.display()
        )
    }
}
