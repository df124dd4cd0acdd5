//! In-memory infrastructure backend.
//!
//! Hands out synthetic `10.x.y.z` hosts. Used by tests and local dry runs;
//! faults can be injected per ordinal (allocation) or per node
//! (deallocation).

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use p2plab_types::{CancelReason, ClusterId, GroupId, LabError, NodeId, NodeMetadata};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use super::{AllocationRequest, InfraBackend};

/// Port every synthetic node serves its control endpoint on.
const CONTROL_PORT: u16 = 7001;

#[derive(Debug, Clone)]
struct Allocation {
    group: GroupId,
    ordinal: usize,
    metadata: NodeMetadata,
}

/// Infrastructure backend keeping machines in a map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    nodes: DashMap<NodeId, Allocation>,
    next_host: AtomicU32,
    latency_ms: AtomicU64,
    failing_ordinals: DashSet<usize>,
    failing_nodes: DashSet<NodeId>,
    deallocations: DashMap<NodeId, usize>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every allocation of the node at `ordinal`.
    pub fn fail_allocation_at(&self, ordinal: usize) {
        self.failing_ordinals.insert(ordinal);
    }

    /// Fail every deallocation of `node`.
    pub fn fail_deallocation_of(&self, node: impl Into<NodeId>) {
        self.failing_nodes.insert(node.into());
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.failing_ordinals.clear();
        self.failing_nodes.clear();
    }

    /// Delay every allocation and deallocation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// How many times deallocation of `node` was attempted.
    pub fn deallocation_attempts(&self, node: &NodeId) -> usize {
        self.deallocations.get(node).map_or(0, |n| *n)
    }

    /// Number of allocated machines across all groups.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no machine is allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    async fn delay(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        group: &GroupId,
    ) -> Result<(), LabError> {
        let latency = Duration::from_millis(self.latency_ms.load(Ordering::Relaxed));
        let canceled = || LabError::Canceled {
            operation: operation.to_string(),
            resource: format!("group {}", group),
            reason: CancelReason::Canceled,
        };

        if cancel.is_cancelled() {
            return Err(canceled());
        }
        if latency.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(canceled()),
            _ = tokio::time::sleep(latency) => Ok(()),
        }
    }

    fn next_address(&self) -> String {
        let host = self.next_host.fetch_add(1, Ordering::Relaxed) + 1;
        format!("10.{}.{}.{}", (host >> 16) & 0xff, (host >> 8) & 0xff, host & 0xff)
    }
}

#[async_trait]
impl InfraBackend for MemoryBackend {
    async fn allocate_node(
        &self,
        cancel: &CancellationToken,
        request: AllocationRequest,
    ) -> Result<NodeMetadata, LabError> {
        self.delay(cancel, "allocate", &request.group).await?;

        if self.failing_ordinals.contains(&request.ordinal) {
            return Err(LabError::Backend {
                group: request.group,
                reason: format!("capacity exhausted allocating node {}", request.ordinal),
            });
        }

        let id = NodeId::new(format!("{}-{}", request.group, request.ordinal));
        let address = self.next_address();
        let mut labels = request.spec.labels.clone();
        labels.insert("region".to_string(), request.spec.region.clone());
        labels.insert("instance_type".to_string(), request.spec.instance_type.clone());

        let mut metadata = NodeMetadata::new(
            id.clone(),
            ClusterId::new(request.group.as_str()),
            address.clone(),
            format!("{}:{}", address, CONTROL_PORT),
        )
        .with_labels(labels);
        metadata.created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        match self.nodes.entry(id) {
            Entry::Occupied(existing) => Err(LabError::Backend {
                group: request.group,
                reason: format!("node {} already allocated", existing.key()),
            }),
            Entry::Vacant(slot) => {
                tracing::debug!(node = %metadata.id, address = %metadata.address, "Allocated node");
                slot.insert(Allocation {
                    group: request.group,
                    ordinal: request.ordinal,
                    metadata: metadata.clone(),
                });
                Ok(metadata)
            }
        }
    }

    async fn deallocate_node(
        &self,
        cancel: &CancellationToken,
        node: &NodeMetadata,
    ) -> Result<(), LabError> {
        let group = GroupId::new(node.cluster.as_str());
        *self.deallocations.entry(node.id.clone()).or_insert(0) += 1;
        self.delay(cancel, "deallocate", &group).await?;

        if self.failing_nodes.contains(&node.id) {
            return Err(LabError::Backend {
                group,
                reason: format!("instance {} stuck in shutting-down", node.id),
            });
        }

        match self.nodes.remove(&node.id) {
            Some(_) => {
                tracing::debug!(node = %node.id, "Deallocated node");
                Ok(())
            }
            None => Err(LabError::NotFound {
                cluster: node.cluster.clone(),
                id: node.id.clone(),
            }),
        }
    }

    async fn list_nodes(&self, group: &GroupId) -> Result<Vec<NodeMetadata>, LabError> {
        let mut members: Vec<(usize, NodeMetadata)> = self
            .nodes
            .iter()
            .filter(|entry| &entry.value().group == group)
            .map(|entry| (entry.value().ordinal, entry.value().metadata.clone()))
            .collect();
        members.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(members.into_iter().map(|(_, metadata)| metadata).collect())
    }
}
