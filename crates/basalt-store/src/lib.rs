//! Basalt blob-store data plane.
//!
//! One blob store per replica, backed by an append-only log under the
//! replica directory. The control plane (basalt-node) drives store
//! lifecycles through the [`BlobStore`] trait; disk managers use
//! [`mount::MountLock`] to claim their mount directories.

pub mod config;
pub mod error;
pub mod mount;
pub mod store;

pub use config::{DiskManagerConfig, StoreConfig};
pub use error::{StoreError, StoreErrorSource};
pub use mount::MountLock;
pub use store::{BlobStore, FileBlobStore, LOG_HEADER_SIZE};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
