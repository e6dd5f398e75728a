use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    InvalidConfig {
        reason: String,
    },
    ReadFailed {
        context: String,
        source: Box<StoreErrorSource>,
    },
    WriteFailed {
        context: String,
        source: Box<StoreErrorSource>,
    },
    DataCorruption {
        context: String,
        details: String,
    },
    StoreNotStarted {
        context: String,
    },
    StoreAlreadyStarted {
        context: String,
    },
    /// A shutdown is in flight; blob operations are refused until it
    /// completes (after which they report `StoreNotStarted`).
    StoreShuttingDown {
        context: String,
    },
    StoreNotFound {
        partition: String,
    },
    StoreDisabled {
        context: String,
    },
    BlobNotFound {
        key: String,
    },
    PermissionDenied {
        context: String,
    },
    InsufficientSpace {
        context: String,
    },
    DirectoryLocked {
        context: String,
        pid: Option<u32>,
    },
    LockAcquisitionFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreErrorSource {
    Io(String),
    Serialization(String),
    Custom(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidConfig { reason } => {
                write!(f, "Invalid store configuration: {reason}")
            }
            StoreError::ReadFailed { context, source } => {
                write!(f, "Read failed in {context}: {source}")
            }
            StoreError::WriteFailed { context, source } => {
                write!(f, "Write failed in {context}: {source}")
            }
            StoreError::DataCorruption { context, details } => {
                write!(f, "Data corruption in {context}: {details}")
            }
            StoreError::StoreNotStarted { context } => {
                write!(f, "Store not started: {context}")
            }
            StoreError::StoreAlreadyStarted { context } => {
                write!(f, "Store already started: {context}")
            }
            StoreError::StoreShuttingDown { context } => {
                write!(f, "Store shutting down: {context}")
            }
            StoreError::StoreNotFound { partition } => {
                write!(f, "No store for partition '{partition}'")
            }
            StoreError::StoreDisabled { context } => {
                write!(f, "Store disabled: {context}")
            }
            StoreError::BlobNotFound { key } => write!(f, "Blob '{key}' not found"),
            StoreError::PermissionDenied { context } => {
                write!(f, "Permission denied in {context}")
            }
            StoreError::InsufficientSpace { context } => {
                write!(f, "Insufficient space in {context}")
            }
            StoreError::DirectoryLocked { context, pid } => match pid {
                Some(pid) => write!(f, "Directory locked in {context} (PID: {pid})"),
                None => write!(f, "Directory locked in {context}"),
            },
            StoreError::LockAcquisitionFailed => {
                write!(f, "Failed to acquire exclusive lock on file")
            }
        }
    }
}

impl fmt::Display for StoreErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorSource::Io(msg) => write!(f, "IO error: {msg}"),
            StoreErrorSource::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            StoreErrorSource::Custom(msg) => write!(f, "Custom error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
impl std::error::Error for StoreErrorSource {}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::StoreNotFound { .. } | StoreError::BlobNotFound { .. }
        )
    }

    /// Errors that make the store unusable, as opposed to per-operation
    /// failures the caller may retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidConfig { .. }
                | StoreError::DataCorruption { .. }
                | StoreError::DirectoryLocked { .. }
                | StoreError::LockAcquisitionFailed
        )
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                context: context.to_string(),
            },
            std::io::ErrorKind::StorageFull => StoreError::InsufficientSpace {
                context: context.to_string(),
            },
            _ => StoreError::WriteFailed {
                context: context.to_string(),
                source: Box::new(StoreErrorSource::Io(e.to_string())),
            },
        }
    }

    pub fn from_read_error(e: std::io::Error, context: &str) -> Self {
        StoreError::ReadFailed {
            context: context.to_string(),
            source: Box::new(StoreErrorSource::Io(e.to_string())),
        }
    }

    pub fn from_serialization_error(e: impl std::fmt::Display, context: &str) -> Self {
        StoreError::DataCorruption {
            context: context.to_string(),
            details: e.to_string(),
        }
    }
}
