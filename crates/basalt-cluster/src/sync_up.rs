//! Replica sync-up barriers.
//!
//! During decommission a node must not drop a replica until its peers have
//! caught up: deactivation waits for peers to sync past the local end offset,
//! disconnection waits for replication links to drain. Both are intentionally
//! unbounded blocking waits; `abort` releases waiters with an error.

use crate::ClusterError;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

/// Cluster-wide service that blocks until a set of peer replicas has caught
/// up to a specified point in the local log.
pub trait ReplicaSyncUpManager: Send + Sync {
    fn initiate_deactivation(&self, partition_name: &str);

    /// Block until deactivation completes. Returns `SyncUpAborted` if the
    /// barrier is torn down before completion.
    fn wait_deactivation_completed(&self, partition_name: &str) -> Result<(), ClusterError>;

    fn on_deactivation_complete(&self, partition_name: &str);

    fn initiate_disconnection(&self, partition_name: &str);

    /// Block until disconnection completes. Returns `SyncUpAborted` if the
    /// barrier is torn down before completion.
    fn wait_disconnection_completed(&self, partition_name: &str) -> Result<(), ClusterError>;

    fn on_disconnection_complete(&self, partition_name: &str);

    /// Release every waiter on this partition with `SyncUpAborted`.
    fn abort(&self, partition_name: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SyncUpPhase {
    Deactivation,
    Disconnection,
}

#[derive(Debug, Default)]
struct LatchState {
    completed: bool,
    aborted: bool,
}

#[derive(Debug, Default)]
struct Latch {
    state: Mutex<LatchState>,
    condvar: Condvar,
}

impl Latch {
    fn complete(&self) {
        let mut state = self.state.lock();
        state.completed = true;
        self.condvar.notify_all();
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.condvar.notify_all();
    }

    fn wait(&self) -> Result<(), ()> {
        let mut state = self.state.lock();
        while !state.completed && !state.aborted {
            self.condvar.wait(&mut state);
        }
        if state.completed { Ok(()) } else { Err(()) }
    }
}

/// In-process sync-up manager backed by per-partition latches.
///
/// Completion signals may arrive before or after the corresponding wait;
/// latches are created on first touch from either side.
#[derive(Default)]
pub struct LatchSyncUpManager {
    latches: Mutex<HashMap<(String, SyncUpPhase), Arc<Latch>>>,
}

impl LatchSyncUpManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn latch(&self, partition_name: &str, phase: SyncUpPhase) -> Arc<Latch> {
        let mut latches = self.latches.lock();
        latches
            .entry((partition_name.to_string(), phase))
            .or_default()
            .clone()
    }

    fn wait_on(&self, partition_name: &str, phase: SyncUpPhase) -> Result<(), ClusterError> {
        let latch = self.latch(partition_name, phase);
        latch.wait().map_err(|()| ClusterError::SyncUpAborted {
            partition: partition_name.to_string(),
        })?;
        // A completed latch is single-use; drop it so a later decommission
        // of a re-added replica starts fresh.
        self.latches
            .lock()
            .remove(&(partition_name.to_string(), phase));
        Ok(())
    }
}

impl ReplicaSyncUpManager for LatchSyncUpManager {
    fn initiate_deactivation(&self, partition_name: &str) {
        debug!("Initiating deactivation sync-up for partition {partition_name}");
        self.latch(partition_name, SyncUpPhase::Deactivation);
    }

    fn wait_deactivation_completed(&self, partition_name: &str) -> Result<(), ClusterError> {
        self.wait_on(partition_name, SyncUpPhase::Deactivation)
    }

    fn on_deactivation_complete(&self, partition_name: &str) {
        self.latch(partition_name, SyncUpPhase::Deactivation).complete();
    }

    fn initiate_disconnection(&self, partition_name: &str) {
        debug!("Initiating disconnection sync-up for partition {partition_name}");
        self.latch(partition_name, SyncUpPhase::Disconnection);
    }

    fn wait_disconnection_completed(&self, partition_name: &str) -> Result<(), ClusterError> {
        self.wait_on(partition_name, SyncUpPhase::Disconnection)
    }

    fn on_disconnection_complete(&self, partition_name: &str) {
        self.latch(partition_name, SyncUpPhase::Disconnection).complete();
    }

    fn abort(&self, partition_name: &str) {
        // Create-and-abort both phases so a waiter that has not parked yet
        // still observes the abort instead of blocking forever.
        for phase in [SyncUpPhase::Deactivation, SyncUpPhase::Disconnection] {
            self.latch(partition_name, phase).abort();
        }
    }
}
