//! Provisioning plus binding.
//!
//! A [`Fleet`] creates node groups through a [`NodeProvider`], binds a
//! [`RemoteNode`] to every member and keeps the handles in one shared
//! [`NodeSet`]. Teardown marks the handles destroyed before releasing the
//! machines, so nobody keeps talking to a node that is going away.

use futures_util::future::join_all;
use p2plab_core::NodeSet;
use p2plab_types::{ClusterDefinition, GroupId, LabError, NodeGroup};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ControlConfig;
use crate::node::RemoteNode;
use crate::provider::NodeProvider;
use crate::session::SessionLauncher;
use crate::transport::Dialer;

/// Node groups and their live handles.
pub struct Fleet {
    provider: Arc<dyn NodeProvider>,
    dialer: Arc<dyn Dialer>,
    launcher: Arc<dyn SessionLauncher>,
    control: ControlConfig,
    nodes: Arc<NodeSet<RemoteNode>>,
}

impl Fleet {
    /// Create a fleet with an empty node set.
    pub fn new(
        provider: Arc<dyn NodeProvider>,
        dialer: Arc<dyn Dialer>,
        launcher: Arc<dyn SessionLauncher>,
        control: ControlConfig,
    ) -> Self {
        Self {
            provider,
            dialer,
            launcher,
            control,
            nodes: Arc::new(NodeSet::new()),
        }
    }

    /// Live handles of every node this fleet has bound.
    pub fn nodes(&self) -> &Arc<NodeSet<RemoteNode>> {
        &self.nodes
    }

    /// Handles of the members of `group`, in group order. Members without a
    /// live handle are skipped.
    pub fn members(&self, group: &NodeGroup) -> Vec<Arc<RemoteNode>> {
        group
            .nodes
            .iter()
            .filter_map(|node| self.nodes.get(&node.id))
            .collect()
    }

    /// Provision a group and bind every member.
    ///
    /// If any member cannot be bound the whole group is destroyed again and
    /// the bind error is returned.
    pub async fn provision(
        &self,
        cancel: &CancellationToken,
        id: &GroupId,
        definition: &ClusterDefinition,
    ) -> Result<NodeGroup, LabError> {
        let group = self.provider.create_node_group(cancel, id, definition).await?;

        let bound = join_all(group.nodes.iter().map(|metadata| {
            RemoteNode::bind(
                cancel,
                metadata.clone(),
                self.dialer.as_ref(),
                Arc::clone(&self.launcher),
                self.control.clone(),
            )
        }))
        .await;

        let mut handles = Vec::with_capacity(bound.len());
        let mut first_error = None;
        for result in bound {
            match result {
                Ok(node) => handles.push(Arc::new(node)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(error) = first_error {
            tracing::warn!(group = %id, "Binding failed, releasing group: {}", error);
            for node in &handles {
                node.mark_destroyed().await;
            }
            // The caller's token may already be cancelled; release regardless.
            if let Err(e) = self
                .provider
                .destroy_node_group(&CancellationToken::new(), &group)
                .await
            {
                tracing::error!(group = %id, "Releasing unbindable group failed: {}", e);
            }
            return Err(error);
        }

        for node in handles {
            if let Some(stale) = self.nodes.replace(node) {
                stale.mark_destroyed().await;
            }
        }
        tracing::info!(group = %id, nodes = group.len(), "Fleet group ready");
        Ok(group)
    }

    /// Mark every member destroyed, drop it from the node set and release
    /// the group's machines.
    pub async fn teardown(
        &self,
        cancel: &CancellationToken,
        group: &NodeGroup,
    ) -> Result<(), LabError> {
        for metadata in &group.nodes {
            if let Some(node) = self.nodes.remove_id(&metadata.id) {
                node.mark_destroyed().await;
            }
        }
        self.provider.destroy_node_group(cancel, group).await
    }
}
