//! Shared fixtures for node integration tests.

use basalt_cluster::{
    ClusterError, ClusterParticipant, DataNodeId, Disk, LatchSyncUpManager, ListenerType,
    LocalParticipant, Partition, PartitionId, PartitionStateChangeListener, ReplicaDescriptor,
    ReplicaSyncUpManager, StateTransitionError, StaticClusterMap,
};
use basalt_node::StorageManager;
use basalt_store::{DiskManagerConfig, StoreConfig};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DISK_CAPACITY: u64 = 1 << 30;
pub const PARTITION_CAPACITY: u64 = 1 << 20;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn wait_for_event(log: &EventLog, needle: &str, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if events(log).iter().any(|event| event == needle) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Stand-in for the replication/stats managers: records every callback.
pub struct RecordingListener {
    name: &'static str,
    events: EventLog,
}

impl RecordingListener {
    pub fn new(name: &'static str, events: EventLog) -> Arc<Self> {
        Arc::new(Self { name, events })
    }

    fn record(&self, label: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}.{label}", self.name));
    }
}

impl PartitionStateChangeListener for RecordingListener {
    fn on_become_bootstrap_from_offline(
        &self,
        _partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        self.record("bootstrap_from_offline");
        Ok(())
    }

    fn on_become_inactive_from_standby(
        &self,
        _partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        self.record("standby_to_inactive");
        Ok(())
    }

    fn on_become_offline_from_inactive(
        &self,
        _partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        self.record("inactive_to_offline");
        Ok(())
    }

    fn on_become_dropped_from_offline(
        &self,
        _partition_name: &str,
    ) -> Result<(), StateTransitionError> {
        self.record("dropped_from_offline");
        Ok(())
    }
}

/// Latch-backed sync-up manager that records the blocking waits.
pub struct RecordingSyncUp {
    inner: LatchSyncUpManager,
    events: EventLog,
}

impl RecordingSyncUp {
    pub fn new(events: EventLog) -> Arc<Self> {
        Arc::new(Self {
            inner: LatchSyncUpManager::new(),
            events,
        })
    }

    fn record(&self, label: &str) {
        self.events.lock().unwrap().push(format!("syncup.{label}"));
    }
}

impl ReplicaSyncUpManager for RecordingSyncUp {
    fn initiate_deactivation(&self, partition_name: &str) {
        self.inner.initiate_deactivation(partition_name);
    }

    fn wait_deactivation_completed(&self, partition_name: &str) -> Result<(), ClusterError> {
        self.record("wait_deactivation");
        self.inner.wait_deactivation_completed(partition_name)
    }

    fn on_deactivation_complete(&self, partition_name: &str) {
        self.inner.on_deactivation_complete(partition_name);
    }

    fn initiate_disconnection(&self, partition_name: &str) {
        self.inner.initiate_disconnection(partition_name);
    }

    fn wait_disconnection_completed(&self, partition_name: &str) -> Result<(), ClusterError> {
        self.record("wait_disconnection");
        self.inner.wait_disconnection_completed(partition_name)
    }

    fn on_disconnection_complete(&self, partition_name: &str) {
        self.inner.on_disconnection_complete(partition_name);
    }

    fn abort(&self, partition_name: &str) {
        self.inner.abort(partition_name);
    }
}

pub struct TestNode {
    pub _dir: tempfile::TempDir,
    pub disks: Vec<Arc<Disk>>,
    pub cluster_map: Arc<StaticClusterMap>,
    pub participant: Arc<LocalParticipant>,
    pub sync_up: Arc<RecordingSyncUp>,
    pub manager: Arc<StorageManager>,
    pub events: EventLog,
}

impl TestNode {
    pub fn mount(&self) -> &Path {
        self.disks[0].mount_path()
    }
}

pub fn node_id() -> DataNodeId {
    DataNodeId::new("localhost", 7075)
}

pub fn start_node(partitions: &[u64]) -> TestNode {
    start_node_with(partitions, 1, StoreConfig::default(), |_| {})
}

/// Build and start a node hosting `partitions` (all on disk0).
///
/// `disk_count` adds further, larger, empty disks so dynamic bootstrap has
/// somewhere new to land. `before_start` runs against the disk0 mount before
/// the storage manager starts, for planting markers and residue.
pub fn start_node_with(
    partitions: &[u64],
    disk_count: usize,
    store_config: StoreConfig,
    before_start: impl FnOnce(&Path),
) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let events = new_event_log();
    let sync_up = RecordingSyncUp::new(events.clone());

    let mut disks = Vec::new();
    for index in 0..disk_count.max(1) {
        let mount = dir.path().join(format!("disk{index}"));
        // Later disks get more room so allocation prefers them.
        let capacity = DISK_CAPACITY * (index as u64 + 1);
        disks.push(Arc::new(Disk::new(mount, capacity, "reserved")));
    }

    let cluster_map = Arc::new(StaticClusterMap::new());
    cluster_map.add_node(node_id(), disks.clone());
    for &id in partitions {
        let partition = Partition::new(PartitionId(id), PARTITION_CAPACITY);
        cluster_map.add_partition(partition);
        assert!(disks[0].try_reserve(partition.capacity_bytes));
        cluster_map.register_replica(
            &node_id(),
            Arc::new(ReplicaDescriptor::new(partition, disks[0].clone())),
        );
    }

    let participant = Arc::new(LocalParticipant::new(
        node_id(),
        Some(sync_up.clone() as Arc<dyn ReplicaSyncUpManager>),
    ));
    participant.register_partition_state_change_listener(
        ListenerType::ReplicationManager,
        RecordingListener::new("replication", events.clone()),
    );
    participant.register_partition_state_change_listener(
        ListenerType::StatsManager,
        RecordingListener::new("stats", events.clone()),
    );

    before_start(disks[0].mount_path());

    let manager = StorageManager::new(
        store_config,
        DiskManagerConfig::default(),
        cluster_map.clone(),
        node_id(),
        vec![participant.clone() as Arc<dyn ClusterParticipant>],
    )
    .unwrap();
    manager.start().unwrap();

    TestNode {
        _dir: dir,
        disks,
        cluster_map,
        participant,
        sync_up,
        manager,
        events,
    }
}

/// Register a partition in the cluster map so a bootstrap transition can
/// allocate it, and return its id.
pub fn register_partition(node: &TestNode, id: u64) -> PartitionId {
    node.cluster_map
        .add_partition(Partition::new(PartitionId(id), PARTITION_CAPACITY));
    PartitionId(id)
}

pub fn residual_dir(mount: &Path, partition_name: &str) -> PathBuf {
    mount.join(partition_name)
}
