//! Error types for cluster model operations and state transitions.

use std::fmt;

/// Main error type for cluster map and participant operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterError {
    ReplicaNotFound {
        partition: String,
    },
    NodeNotFound {
        node: String,
    },
    /// Invalid cluster layout structure or data.
    InvalidLayout {
        context: String,
        reason: String,
    },
    /// Layout file I/O error.
    LayoutIo {
        context: String,
        reason: String,
    },
    /// The coordinator rejected a data-node info update.
    UpdateRejected {
        context: String,
    },
    /// The participant was asked to do something in a state it cannot honor.
    IllegalState {
        context: String,
    },
    /// A blocking sync-up wait was aborted before completion.
    SyncUpAborted {
        partition: String,
    },
    /// No disk on the node has enough available capacity for the replica.
    InsufficientCapacity {
        partition: String,
    },
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::ReplicaNotFound { partition } => {
                write!(f, "Replica for partition '{partition}' not found")
            }
            ClusterError::NodeNotFound { node } => {
                write!(f, "Node '{node}' not found in cluster layout")
            }
            ClusterError::InvalidLayout { context, reason } => {
                write!(f, "Invalid cluster layout in {context}: {reason}")
            }
            ClusterError::LayoutIo { context, reason } => {
                write!(f, "Layout I/O error in {context}: {reason}")
            }
            ClusterError::UpdateRejected { context } => {
                write!(f, "Data-node info update rejected: {context}")
            }
            ClusterError::IllegalState { context } => {
                write!(f, "Participant in illegal state: {context}")
            }
            ClusterError::SyncUpAborted { partition } => {
                write!(f, "Sync-up wait aborted for partition '{partition}'")
            }
            ClusterError::InsufficientCapacity { partition } => {
                write!(
                    f,
                    "No disk with sufficient capacity for partition '{partition}'"
                )
            }
        }
    }
}

impl std::error::Error for ClusterError {}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClusterError::ReplicaNotFound { .. } | ClusterError::NodeNotFound { .. }
        )
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        ClusterError::LayoutIo {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_parse_error(e: impl std::fmt::Display, context: &str) -> Self {
        ClusterError::InvalidLayout {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Failure kinds a state-transition callback can surface to the coordinator.
///
/// The coordinator interprets any raised failure as "move this replica to
/// ERROR on this node"; the kind picks the metric and log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransitionErrorKind {
    ReplicaNotFound,
    ReplicaOperationFailure,
    StoreNotStarted,
    ClusterUpdateFailure,
}

impl fmt::Display for StateTransitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateTransitionErrorKind::ReplicaNotFound => "ReplicaNotFound",
            StateTransitionErrorKind::ReplicaOperationFailure => "ReplicaOperationFailure",
            StateTransitionErrorKind::StoreNotStarted => "StoreNotStarted",
            StateTransitionErrorKind::ClusterUpdateFailure => "ClusterUpdateFailure",
        };
        write!(f, "{name}")
    }
}

/// Error surfaced out of a partition state-transition callback.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransitionError {
    pub kind: StateTransitionErrorKind,
    pub partition: String,
    pub context: String,
}

impl StateTransitionError {
    pub fn new(
        kind: StateTransitionErrorKind,
        partition: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            partition: partition.into(),
            context: context.into(),
        }
    }

    pub fn replica_not_found(partition: impl Into<String>, context: impl Into<String>) -> Self {
        Self::new(StateTransitionErrorKind::ReplicaNotFound, partition, context)
    }

    pub fn operation_failure(partition: impl Into<String>, context: impl Into<String>) -> Self {
        Self::new(
            StateTransitionErrorKind::ReplicaOperationFailure,
            partition,
            context,
        )
    }

    pub fn store_not_started(partition: impl Into<String>, context: impl Into<String>) -> Self {
        Self::new(StateTransitionErrorKind::StoreNotStarted, partition, context)
    }

    pub fn cluster_update_failure(
        partition: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::new(
            StateTransitionErrorKind::ClusterUpdateFailure,
            partition,
            context,
        )
    }
}

impl fmt::Display for StateTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State transition failed for partition '{}' ({}): {}",
            self.partition, self.kind, self.context
        )
    }
}

impl std::error::Error for StateTransitionError {}
