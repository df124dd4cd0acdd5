//! Error types for p2plab.

use std::fmt;
use thiserror::Error;

use crate::{ClusterId, GroupId, NodeId};

/// Why an operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled the operation.
    Canceled,
    /// The operation ran past its configured deadline.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Canceled => f.write_str("canceled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors that can occur in p2plab operations.
#[derive(Debug, Error)]
pub enum LabError {
    /// No metadata record exists for the node.
    #[error("node {id} not found in cluster {cluster}")]
    NotFound {
        /// Cluster that was searched.
        cluster: ClusterId,
        /// Node that was requested.
        id: NodeId,
    },

    /// Malformed input.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending input.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The node's control endpoint could not be reached.
    #[error("node {node} unreachable at {address}: {reason}")]
    Connectivity {
        /// Node being contacted.
        node: NodeId,
        /// Control address that was dialed.
        address: String,
        /// Transport failure.
        reason: String,
    },

    /// A conflicting operation is already in progress on the node.
    #[error("node {node} busy: {operation} rejected while {current} in progress")]
    Busy {
        /// Node that rejected the operation.
        node: NodeId,
        /// Operation that was rejected.
        operation: String,
        /// Operation holding the node.
        current: String,
    },

    /// The caller cancelled the operation or its deadline passed.
    #[error("{operation} on {resource} stopped: {reason}")]
    Canceled {
        /// Operation that was interrupted.
        operation: String,
        /// Identity of the affected resource (e.g. `node n-1`, `group g-1`).
        resource: String,
        /// Cancellation or deadline.
        reason: CancelReason,
    },

    /// The node has been destroyed.
    #[error("node {node} is destroyed")]
    Gone {
        /// The destroyed node.
        node: NodeId,
    },

    /// Several independent per-node failures collected during a bulk operation.
    #[error(
        "teardown of group {group} failed on {} node(s): {}",
        .failures.len(),
        NodeFailure::join(.failures)
    )]
    Aggregate {
        /// Group being torn down.
        group: GroupId,
        /// One entry per failing node.
        failures: Vec<NodeFailure>,
    },

    /// Provisioning failed; everything created by the call was torn down.
    #[error("provisioning group {group} failed and was rolled back: {source}")]
    Provision {
        /// Group that was being created.
        group: GroupId,
        /// The failure that triggered the rollback.
        #[source]
        source: Box<LabError>,
    },

    /// The node executed the request and reported a failure.
    #[error("node {node} failed {operation}: {message}")]
    Remote {
        /// Node that reported the failure.
        node: NodeId,
        /// Operation that failed.
        operation: String,
        /// Failure reported by the node.
        message: String,
    },

    /// The node answered with something that is not a valid reply.
    #[error("protocol error from node {node}: {reason}")]
    Protocol {
        /// Node that sent the reply.
        node: NodeId,
        /// What was wrong with it.
        reason: String,
    },

    /// The infrastructure backend failed.
    #[error("backend error in group {group}: {reason}")]
    Backend {
        /// Group the backend call was made for.
        group: GroupId,
        /// Backend failure.
        reason: String,
    },

    /// MessagePack serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed.
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),
}

impl LabError {
    /// Build a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a cancellation error for an operation on a node.
    pub fn canceled(operation: impl Into<String>, node: &NodeId, reason: CancelReason) -> Self {
        Self::Canceled {
            operation: operation.into(),
            resource: format!("node {}", node),
            reason,
        }
    }

    /// Returns true for [`LabError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`LabError::Canceled`], looking through a provisioning wrapper.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled { .. } => true,
            Self::Provision { source, .. } => source.is_canceled(),
            _ => false,
        }
    }
}

/// A single node's failure inside a [`LabError::Aggregate`].
#[derive(Debug)]
pub struct NodeFailure {
    /// The node that failed.
    pub node: NodeId,
    /// Its error.
    pub error: LabError,
}

impl NodeFailure {
    fn join(failures: &[NodeFailure]) -> String {
        failures
            .iter()
            .map(|f| format!("[{}] {}", f.node, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
