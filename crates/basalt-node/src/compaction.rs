//! Per-disk compaction executor.
//!
//! One background thread per disk manager works a queue of partitions:
//! explicit scheduling puts a partition at the front, and a periodic sweep
//! re-enqueues every started, compaction-enabled store. The executor holds
//! the queue lock and the store registry lock one at a time, never nested.

use basalt_cluster::PartitionId;
use basalt_store::BlobStore;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

struct ExecutorInner {
    disk_label: String,
    stores: Mutex<HashMap<PartitionId, Arc<dyn BlobStore>>>,
    disabled: Mutex<HashSet<PartitionId>>,
    queue: Mutex<VecDeque<PartitionId>>,
    queue_cv: Condvar,
    running: AtomicBool,
    check_interval: Duration,
}

impl ExecutorInner {
    fn is_eligible(&self, partition: PartitionId) -> bool {
        if self.disabled.lock().contains(&partition) {
            return false;
        }
        self.stores
            .lock()
            .get(&partition)
            .is_some_and(|store| store.is_started() && !store.is_disabled())
    }

    fn enqueue_periodic_candidates(&self) {
        let candidates: Vec<PartitionId> = {
            let stores = self.stores.lock();
            stores
                .iter()
                .filter(|(_, store)| store.is_started() && !store.is_disabled())
                .map(|(partition, _)| *partition)
                .collect()
        };
        let disabled = self.disabled.lock().clone();

        let mut queue = self.queue.lock();
        for partition in candidates {
            if !disabled.contains(&partition) && !queue.contains(&partition) {
                queue.push_back(partition);
            }
        }
    }

    fn compact_one(&self, partition: PartitionId) {
        if !self.is_eligible(partition) {
            debug!(
                "Skipping compaction of partition {partition} on {}: not eligible",
                self.disk_label
            );
            return;
        }
        let store = match self.stores.lock().get(&partition) {
            Some(store) => store.clone(),
            None => return,
        };
        match store.compact() {
            Ok(0) => {}
            Ok(reclaimed) => {
                info!(
                    "Compaction of partition {partition} on {} reclaimed {reclaimed} bytes",
                    self.disk_label
                );
            }
            Err(e) => {
                error!(
                    "Compaction of partition {partition} on {} failed: {e}",
                    self.disk_label
                );
            }
        }
    }

    fn run(&self) {
        info!("Compaction executor for {} started", self.disk_label);
        while self.running.load(Ordering::SeqCst) {
            let next = {
                let mut queue = self.queue.lock();
                if queue.is_empty() {
                    let timed_out = self
                        .queue_cv
                        .wait_for(&mut queue, self.check_interval)
                        .timed_out();
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if timed_out && queue.is_empty() {
                        drop(queue);
                        self.enqueue_periodic_candidates();
                        continue;
                    }
                }
                queue.pop_front()
            };
            if let Some(partition) = next {
                self.compact_one(partition);
            }
        }
        info!("Compaction executor for {} stopped", self.disk_label);
    }
}

/// Compaction scheduling surface of one disk manager.
pub struct CompactionExecutor {
    inner: Arc<ExecutorInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompactionExecutor {
    pub fn new(disk_label: impl Into<String>, check_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                disk_label: disk_label.into(),
                stores: Mutex::new(HashMap::new()),
                disabled: Mutex::new(HashSet::new()),
                queue: Mutex::new(VecDeque::new()),
                queue_cv: Condvar::new(),
                running: AtomicBool::new(false),
                check_interval,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!(
                "Compaction executor for {} already running",
                self.inner.disk_label
            );
            return;
        }
        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name(format!("compaction-{}", self.inner.disk_label))
            .spawn(move || inner.run())
            .expect("spawning compaction executor thread");
        *self.worker.lock() = Some(handle);
    }

    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.queue_cv.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(
                    "Compaction executor thread for {} panicked",
                    self.inner.disk_label
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn register_store(&self, partition: PartitionId, store: Arc<dyn BlobStore>) {
        self.inner.stores.lock().insert(partition, store);
    }

    pub fn deregister_store(&self, partition: PartitionId) {
        self.inner.stores.lock().remove(&partition);
        self.inner.disabled.lock().remove(&partition);
        self.inner.queue.lock().retain(|queued| *queued != partition);
    }

    /// Put `partition` at the head of the compaction queue. Returns false if
    /// the executor is stopped or the store is not eligible.
    pub fn schedule_next(&self, partition: PartitionId) -> bool {
        if !self.inner.running.load(Ordering::SeqCst) || !self.inner.is_eligible(partition) {
            return false;
        }
        let mut queue = self.inner.queue.lock();
        queue.retain(|queued| *queued != partition);
        queue.push_front(partition);
        self.inner.queue_cv.notify_one();
        true
    }

    /// Enable or disable compaction for one partition. Returns false if the
    /// partition is not registered with this executor.
    pub fn control(&self, partition: PartitionId, enabled: bool) -> bool {
        if !self.inner.stores.lock().contains_key(&partition) {
            return false;
        }
        if enabled {
            self.inner.disabled.lock().remove(&partition);
        } else {
            self.inner.disabled.lock().insert(partition);
            self.inner.queue.lock().retain(|queued| *queued != partition);
        }
        debug!(
            "Compaction for partition {partition} on {} {}",
            self.inner.disk_label,
            if enabled { "enabled" } else { "disabled" }
        );
        true
    }

    /// Whether compaction is currently enabled for a registered partition.
    pub fn is_enabled(&self, partition: PartitionId) -> bool {
        self.inner.stores.lock().contains_key(&partition)
            && !self.inner.disabled.lock().contains(&partition)
    }
}

impl Drop for CompactionExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
