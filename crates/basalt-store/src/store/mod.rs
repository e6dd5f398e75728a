//! Blob store abstraction and implementations.

pub mod file;

pub use file::{FileBlobStore, LOG_HEADER_SIZE};

use crate::error::StoreError;
use basalt_cluster::ReplicaState;

/// The data-plane object attached to one replica.
///
/// The control plane drives the lifecycle surface (start/shutdown, replica
/// state, decommission recovery); request handlers use the blob operations.
/// All methods take `&self`: a store is shared behind an `Arc` between the
/// disk manager, the compaction executor, and transition callbacks.
pub trait BlobStore: Send + Sync {
    /// Open or recover the store. Fails if already started.
    fn start(&self) -> Result<(), StoreError>;

    /// Close the store, flushing pending writes. Idempotent.
    fn shutdown(&self) -> Result<(), StoreError>;

    fn is_started(&self) -> bool;

    /// Administratively disabled stores refuse blob operations and state
    /// transitions until re-enabled.
    fn is_disabled(&self) -> bool;

    fn set_disabled(&self, disabled: bool);

    /// Bytes used on disk, including the log header. Readable whether or not
    /// the store is started.
    fn size_in_bytes(&self) -> Result<u64, StoreError>;

    fn current_state(&self) -> ReplicaState;

    /// Record a new lifecycle state; the old one becomes the previous state.
    fn set_current_state(&self, state: ReplicaState);

    fn previous_state(&self) -> ReplicaState;

    /// Whether this store must resume an interrupted decommission before it
    /// can be dropped. Loaded from the decommission marker at start.
    fn recover_from_decommission(&self) -> bool;

    fn set_recover_from_decommission(&self, recover: bool);

    /// Rewrite the log without deleted/superseded entries. Returns bytes
    /// reclaimed (zero when there is nothing to reclaim).
    fn compact(&self) -> Result<u64, StoreError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Append a delete tombstone for `key`.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
