//! Store and disk-manager configuration.

use crate::error::StoreError;
use serde::Deserialize;

/// Configuration shared by every blob store on the node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Interval between periodic index/log flushes. Zero means every append
    /// is synced immediately.
    pub flush_interval_secs: u64,
    /// Whether deleted blobs are eventually scrubbed from the log.
    pub hard_delete_enabled: bool,
    /// How long delete tombstones are retained before compaction may scrub
    /// the deleted blob.
    pub deleted_message_retention_mins: u64,
    /// Name of the per-disk directory holding preallocated reserve files.
    pub reserved_dir_name: String,
    /// Whether a full-auto coordinator may resume an interrupted
    /// decommission based on a previous store state of OFFLINE. Fresh stores
    /// load with a previous state of OFFLINE, so nodes that bootstrap large
    /// replica sets under a full-auto coordinator can opt out.
    pub full_auto_resume_on_offline_previous_state: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
            hard_delete_enabled: false,
            deleted_message_retention_mins: 7 * 24 * 60,
            reserved_dir_name: "reserved".to_string(),
            full_auto_resume_on_offline_previous_state: true,
        }
    }
}

impl StoreConfig {
    /// Fail-fast validation, run once at storage-manager construction.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.reserved_dir_name.is_empty() {
            return Err(StoreError::InvalidConfig {
                reason: "reserved dir name must be non-empty".to_string(),
            });
        }
        if self.hard_delete_enabled {
            let minimum_retention_mins = self.flush_interval_secs / 60 + 1;
            if self.deleted_message_retention_mins < minimum_retention_mins {
                return Err(StoreError::InvalidConfig {
                    reason: format!(
                        "deleted message retention ({} mins) must be at least flush interval \
                         plus one minute ({} mins) when hard delete is enabled",
                        self.deleted_message_retention_mins, minimum_retention_mins
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Configuration for each disk manager.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiskManagerConfig {
    /// How often the compaction executor re-evaluates started stores.
    pub compaction_check_interval_secs: u64,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            compaction_check_interval_secs: 30 * 60,
        }
    }
}
