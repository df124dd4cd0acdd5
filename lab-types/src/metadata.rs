//! Provisioning records: node metadata, cluster definitions and node groups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ClusterId, GroupId, LabError, NodeId};

/// Persisted identity record of a provisioned node.
///
/// Owned by the metadata store; this workspace only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Node identifier.
    pub id: NodeId,
    /// Owning cluster.
    pub cluster: ClusterId,
    /// Network address of the node (host or IP), used for SSH.
    pub address: String,
    /// Address of the node's control endpoint.
    pub control_address: String,
    /// Git reference of the installed build, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_reference: Option<String>,
    /// Free-form labels inherited from the cluster group.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Unix timestamp (seconds) of creation.
    #[serde(default)]
    pub created_at: u64,
}

impl NodeMetadata {
    /// Create a metadata record with no labels and no build reference.
    pub fn new(
        id: impl Into<NodeId>,
        cluster: impl Into<ClusterId>,
        address: impl Into<String>,
        control_address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            cluster: cluster.into(),
            address: address.into(),
            control_address: control_address.into(),
            git_reference: None,
            labels: BTreeMap::new(),
            created_at: 0,
        }
    }

    /// Attach labels.
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// One homogeneous slice of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterGroup {
    /// Number of nodes to provision.
    pub size: usize,
    /// Backend-specific machine shape.
    pub instance_type: String,
    /// Backend-specific placement.
    pub region: String,
    /// Labels applied to every node of this group.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ClusterGroup {
    /// Create a group description with no labels.
    pub fn new(size: usize, instance_type: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            size,
            instance_type: instance_type.into(),
            region: region.into(),
            labels: BTreeMap::new(),
        }
    }
}

/// Shape of a cluster to provision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDefinition {
    /// Cluster groups, in provisioning order.
    pub groups: Vec<ClusterGroup>,
}

impl ClusterDefinition {
    /// Create a definition from its groups.
    pub fn new(groups: Vec<ClusterGroup>) -> Self {
        Self { groups }
    }

    /// Total number of nodes requested, saturating at `usize::MAX`.
    pub fn node_count(&self) -> usize {
        self.groups
            .iter()
            .fold(0usize, |total, g| total.saturating_add(g.size))
    }

    /// Reject definitions that would provision nothing or whose total size
    /// does not fit in a `usize`.
    pub fn validate(&self) -> Result<(), LabError> {
        if self.groups.is_empty() {
            return Err(LabError::validation(
                "cluster definition",
                "at least one group is required",
            ));
        }
        if let Some(index) = self.groups.iter().position(|g| g.size == 0) {
            return Err(LabError::validation(
                "cluster definition",
                format!("group {} has size 0", index),
            ));
        }
        if self
            .groups
            .iter()
            .try_fold(0usize, |total, g| total.checked_add(g.size))
            .is_none()
        {
            return Err(LabError::validation(
                "cluster definition",
                "total node count overflows",
            ));
        }
        Ok(())
    }

    /// Iterate over `(ordinal, group)` pairs, one per requested node.
    ///
    /// Ordinals are dense and start at zero.
    pub fn slots(&self) -> impl Iterator<Item = (usize, &ClusterGroup)> {
        self.groups
            .iter()
            .flat_map(|g| std::iter::repeat(g).take(g.size))
            .enumerate()
    }
}

/// The nodes provisioned together under one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    /// Group identifier.
    pub id: GroupId,
    /// Member nodes, ordered by ordinal.
    pub nodes: Vec<NodeMetadata>,
}

impl NodeGroup {
    /// Number of member nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a member by id.
    pub fn node(&self, id: &NodeId) -> Option<&NodeMetadata> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}
