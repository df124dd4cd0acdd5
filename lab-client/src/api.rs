//! Node lookup by cluster and id.
//!
//! [`LabNodeApi`] resolves a node's metadata from a [`MetadataStore`], binds
//! a [`RemoteNode`] to its control endpoint and caches the handle in the
//! cluster's [`NodeSet`], so repeated lookups share one connection.

use async_trait::async_trait;
use dashmap::DashMap;
use p2plab_core::{NodeIdentity, NodeSet};
use p2plab_types::{CancelReason, ClusterId, LabError, NodeGroup, NodeId, NodeMetadata};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ControlConfig;
use crate::node::{Node, RemoteNode};
use crate::session::SessionLauncher;
use crate::transport::Dialer;

/// Read access to persisted node metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// The record for `id` in `cluster`, if one exists.
    async fn node(&self, cluster: &ClusterId, id: &NodeId)
        -> Result<Option<NodeMetadata>, LabError>;
}

/// Looks up live nodes.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Return a live handle to node `id` of `cluster`.
    ///
    /// Fails with [`LabError::NotFound`] if no metadata exists and with
    /// [`LabError::Connectivity`] if the node's control endpoint cannot be
    /// reached.
    async fn get(
        &self,
        cancel: &CancellationToken,
        cluster: &ClusterId,
        id: &NodeId,
    ) -> Result<Arc<dyn Node>, LabError>;
}

/// Metadata store held in memory.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: DashMap<(ClusterId, NodeId), NodeMetadata>,
}

impl MemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record.
    pub fn put(&self, metadata: NodeMetadata) {
        self.records
            .insert((metadata.cluster.clone(), metadata.id.clone()), metadata);
    }

    /// Insert a record for every member of `group`.
    pub fn put_group(&self, group: &NodeGroup) {
        for node in &group.nodes {
            self.put(node.clone());
        }
    }

    /// Remove a record.
    pub fn remove(&self, cluster: &ClusterId, id: &NodeId) -> Option<NodeMetadata> {
        self.records
            .remove(&(cluster.clone(), id.clone()))
            .map(|(_, metadata)| metadata)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn node(
        &self,
        cluster: &ClusterId,
        id: &NodeId,
    ) -> Result<Option<NodeMetadata>, LabError> {
        Ok(self
            .records
            .get(&(cluster.clone(), id.clone()))
            .map(|entry| entry.value().clone()))
    }
}

/// [`NodeApi`] binding nodes over a [`Dialer`].
pub struct LabNodeApi {
    store: Arc<dyn MetadataStore>,
    dialer: Arc<dyn Dialer>,
    launcher: Arc<dyn SessionLauncher>,
    control: ControlConfig,
    clusters: DashMap<ClusterId, Arc<NodeSet<RemoteNode>>>,
}

impl LabNodeApi {
    /// Create a node API.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        dialer: Arc<dyn Dialer>,
        launcher: Arc<dyn SessionLauncher>,
        control: ControlConfig,
    ) -> Self {
        Self {
            store,
            dialer,
            launcher,
            control,
            clusters: DashMap::new(),
        }
    }

    /// Share `set` as the handle cache for `cluster`, so nodes bound
    /// elsewhere (e.g. by a [`Fleet`](crate::fleet::Fleet)) are reused.
    pub fn register_cluster(&self, cluster: ClusterId, set: Arc<NodeSet<RemoteNode>>) {
        self.clusters.insert(cluster, set);
    }

    /// The handle cache for `cluster`, if one is registered or a lookup has
    /// bound a node in it.
    pub fn node_set(&self, cluster: &ClusterId) -> Option<Arc<NodeSet<RemoteNode>>> {
        // Clone out of the guard so no shard lock outlives this call.
        self.clusters.get(cluster).map(|set| Arc::clone(set.value()))
    }

    /// Number of clusters with a handle cache.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    fn cache_for(&self, cluster: &ClusterId) -> Arc<NodeSet<RemoteNode>> {
        if let Some(set) = self.node_set(cluster) {
            return set;
        }
        Arc::clone(self.clusters.entry(cluster.clone()).or_default().value())
    }

    /// A live cached handle for `id` that belongs to `cluster`.
    ///
    /// A set may be shared across clusters, so the handle's own cluster is
    /// checked; destroyed handles are evicted.
    fn cached(
        &self,
        set: &NodeSet<RemoteNode>,
        cluster: &ClusterId,
        id: &NodeId,
    ) -> Option<Arc<RemoteNode>> {
        let node = set.get(id)?;
        if &node.metadata().cluster != cluster {
            return None;
        }
        if node.state().is_destroyed() {
            set.remove_id(id);
            return None;
        }
        Some(node)
    }
}

#[async_trait]
impl NodeApi for LabNodeApi {
    async fn get(
        &self,
        cancel: &CancellationToken,
        cluster: &ClusterId,
        id: &NodeId,
    ) -> Result<Arc<dyn Node>, LabError> {
        if cluster.is_empty() {
            return Err(LabError::validation("cluster id", "must not be empty"));
        }
        if id.is_empty() {
            return Err(LabError::validation("node id", "must not be empty"));
        }
        if cancel.is_cancelled() {
            return Err(LabError::canceled("get", id, CancelReason::Canceled));
        }

        if let Some(set) = self.node_set(cluster) {
            if let Some(node) = self.cached(&set, cluster, id) {
                tracing::trace!(%cluster, node = %id, "Node handle cache hit");
                return Ok(node);
            }
        }

        let metadata = match self.store.node(cluster, id).await? {
            Some(metadata) if &metadata.cluster == cluster => metadata,
            _ => {
                return Err(LabError::NotFound {
                    cluster: cluster.clone(),
                    id: id.clone(),
                })
            }
        };

        let bound = Arc::new(
            RemoteNode::bind(
                cancel,
                metadata,
                self.dialer.as_ref(),
                Arc::clone(&self.launcher),
                self.control.clone(),
            )
            .await?,
        );

        // A concurrent lookup may have bound the same node first; keep its
        // handle and close ours.
        let node = self.cache_for(cluster).get_or_insert(Arc::clone(&bound));
        if !Arc::ptr_eq(&node, &bound) {
            bound.mark_destroyed().await;
        }
        Ok(node)
    }
}
