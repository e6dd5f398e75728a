//! Basalt node control plane.
//!
//! The storage manager owns one disk manager per mounted disk and reconciles
//! local disk state with the cluster-wide replica assignments delivered by
//! the coordination service: bootstrap of new replicas, decommission of
//! departing ones, stop-state persistence, and compaction scheduling.

pub mod compaction;
pub mod disk_manager;
pub mod metrics;
pub mod state_adapter;
pub mod storage_manager;
pub mod telemetry;

pub use compaction::CompactionExecutor;
pub use disk_manager::DiskManager;
pub use metrics::{MetricsSnapshot, NodeMetrics};
pub use state_adapter::PartitionStateAdapter;
pub use storage_manager::{LocalPartitionStatus, StorageManager};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
