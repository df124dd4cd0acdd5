//! Infrastructure backends.
//!
//! An [`InfraBackend`] creates and deletes single machines. Group-level
//! semantics (all-or-nothing creation, aggregated teardown) are built on top
//! by [`BackendProvider`](crate::provider::BackendProvider).

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use p2plab_types::{ClusterGroup, GroupId, LabError, NodeMetadata};
use tokio_util::sync::CancellationToken;

/// One node to allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Group the node belongs to.
    pub group: GroupId,
    /// Position of the node in the group, dense from zero.
    pub ordinal: usize,
    /// Shape of the node.
    pub spec: ClusterGroup,
}

/// Creates and deletes individual machines.
#[async_trait]
pub trait InfraBackend: Send + Sync {
    /// Allocate one machine and return its metadata.
    async fn allocate_node(
        &self,
        cancel: &CancellationToken,
        request: AllocationRequest,
    ) -> Result<NodeMetadata, LabError>;

    /// Release a machine.
    ///
    /// Returns [`LabError::NotFound`] if the machine no longer exists; callers
    /// treat that as already released.
    async fn deallocate_node(
        &self,
        cancel: &CancellationToken,
        node: &NodeMetadata,
    ) -> Result<(), LabError>;

    /// Machines currently allocated under `group`, ordered by ordinal.
    async fn list_nodes(&self, group: &GroupId) -> Result<Vec<NodeMetadata>, LabError>;
}
