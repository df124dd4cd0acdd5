//! Node group provisioning.
//!
//! [`BackendProvider`] turns per-machine [`InfraBackend`] calls into
//! group-level operations:
//!
//! - `create_node_group` is all-or-nothing. If any node fails, every node the
//!   call allocated is released before the error is returned.
//! - `destroy_node_group` attempts every node, tolerates nodes that are
//!   already gone, and reports each remaining failure.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use p2plab_types::{ClusterDefinition, GroupId, LabError, NodeFailure, NodeGroup, NodeId, NodeMetadata};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::backend::{AllocationRequest, InfraBackend};
use crate::config::ProviderConfig;

/// Creates and destroys groups of nodes.
#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// Provision every node described by `definition` under `id`.
    ///
    /// Either all nodes are created and returned, or none remain allocated
    /// and the error is returned.
    async fn create_node_group(
        &self,
        cancel: &CancellationToken,
        id: &GroupId,
        definition: &ClusterDefinition,
    ) -> Result<NodeGroup, LabError>;

    /// Tear down every node of `group`.
    ///
    /// Nodes that no longer exist count as destroyed. Remaining failures are
    /// returned together as [`LabError::Aggregate`].
    async fn destroy_node_group(
        &self,
        cancel: &CancellationToken,
        group: &NodeGroup,
    ) -> Result<(), LabError>;
}

/// [`NodeProvider`] over an infrastructure backend.
pub struct BackendProvider<B> {
    backend: Arc<B>,
    config: ProviderConfig,
    in_flight: Mutex<HashSet<GroupId>>,
}

/// Releases a group id reserved by an in-flight `create_node_group`.
struct Reservation<'a> {
    in_flight: &'a Mutex<HashSet<GroupId>>,
    id: GroupId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl<B: InfraBackend> BackendProvider<B> {
    /// Create a provider.
    pub fn new(backend: Arc<B>, config: ProviderConfig) -> Self {
        Self {
            backend,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn reserve(&self, id: &GroupId) -> Result<Reservation<'_>, LabError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(id.clone()) {
            return Err(LabError::validation(
                "group id",
                format!("group {} is already being provisioned", id),
            ));
        }
        Ok(Reservation {
            in_flight: &self.in_flight,
            id: id.clone(),
        })
    }

    /// Release nodes allocated by a failed provisioning.
    ///
    /// Runs under its own token: the caller's token may be the reason we are
    /// rolling back.
    async fn rollback(&self, id: &GroupId, nodes: &[NodeMetadata]) {
        let cancel = CancellationToken::new();
        let attempts = self.config.rollback_attempts.max(1);

        let leaked: Vec<NodeId> = stream::iter(nodes.iter().cloned())
            .map(|node| {
                let cancel = &cancel;
                async move {
                    for attempt in 1..=attempts {
                        match self.backend.deallocate_node(cancel, &node).await {
                            Ok(()) => return None,
                            Err(e) if e.is_not_found() => return None,
                            Err(e) => tracing::warn!(
                                group = %id,
                                node = %node.id,
                                attempt,
                                "Rollback deallocation failed: {}",
                                e
                            ),
                        }
                    }
                    Some(node.id)
                }
            })
            .buffer_unordered(self.config.teardown_concurrency.max(1))
            .filter_map(|leaked| async move { leaked })
            .collect()
            .await;

        if leaked.is_empty() {
            tracing::info!(group = %id, nodes = nodes.len(), "Rolled back partial group");
        } else {
            tracing::error!(group = %id, ?leaked, "Rollback left nodes allocated");
        }
    }
}

#[async_trait]
impl<B: InfraBackend + 'static> NodeProvider for BackendProvider<B> {
    async fn create_node_group(
        &self,
        cancel: &CancellationToken,
        id: &GroupId,
        definition: &ClusterDefinition,
    ) -> Result<NodeGroup, LabError> {
        if id.is_empty() {
            return Err(LabError::validation("group id", "must not be empty"));
        }
        definition.validate()?;

        let _reservation = self.reserve(id)?;
        if !self.backend.list_nodes(id).await?.is_empty() {
            return Err(LabError::validation(
                "group id",
                format!("group {} already exists", id),
            ));
        }

        tracing::info!(group = %id, nodes = definition.node_count(), "Provisioning node group");

        // Stops the remaining allocations once one has failed.
        let attempt = cancel.child_token();
        let requests: Vec<AllocationRequest> = definition
            .slots()
            .map(|(ordinal, spec)| AllocationRequest {
                group: id.clone(),
                ordinal,
                spec: spec.clone(),
            })
            .collect();
        let results: Vec<(usize, Result<NodeMetadata, LabError>)> = stream::iter(requests)
            .map(|request| {
                let attempt = &attempt;
                let ordinal = request.ordinal;
                async move {
                    let result = self.backend.allocate_node(attempt, request).await;
                    if result.is_err() {
                        attempt.cancel();
                    }
                    (ordinal, result)
                }
            })
            .buffer_unordered(self.config.provision_concurrency.max(1))
            .collect()
            .await;

        let mut allocated = Vec::with_capacity(results.len());
        let mut first_error: Option<LabError> = None;
        for (ordinal, result) in results {
            match result {
                Ok(node) => allocated.push((ordinal, node)),
                Err(e) => {
                    // Prefer the root cause over the cancellations it triggered.
                    let replace = match &first_error {
                        None => true,
                        Some(current) => current.is_canceled() && !e.is_canceled(),
                    };
                    if replace {
                        first_error = Some(e);
                    }
                }
            }
        }
        allocated.sort_by_key(|(ordinal, _)| *ordinal);
        let nodes: Vec<NodeMetadata> = allocated.into_iter().map(|(_, node)| node).collect();

        if let Some(error) = first_error {
            tracing::warn!(group = %id, allocated = nodes.len(), "Provisioning failed: {}", error);
            self.rollback(id, &nodes).await;
            return Err(LabError::Provision {
                group: id.clone(),
                source: Box::new(error),
            });
        }

        tracing::info!(group = %id, nodes = nodes.len(), "Node group provisioned");
        Ok(NodeGroup {
            id: id.clone(),
            nodes,
        })
    }

    async fn destroy_node_group(
        &self,
        cancel: &CancellationToken,
        group: &NodeGroup,
    ) -> Result<(), LabError> {
        tracing::info!(group = %group.id, nodes = group.len(), "Destroying node group");

        let outcomes: Vec<(usize, Result<(), LabError>)> =
            stream::iter(group.nodes.iter().cloned().enumerate())
                .map(|(index, node)| async move {
                    match self.backend.deallocate_node(cancel, &node).await {
                        Err(e) if e.is_not_found() => {
                            tracing::debug!(group = %group.id, node = %node.id, "Node already gone");
                            (index, Ok(()))
                        }
                        result => (index, result),
                    }
                })
                .buffer_unordered(self.config.teardown_concurrency.max(1))
                .collect()
                .await;

        let mut failures: Vec<(usize, NodeFailure)> = outcomes
            .into_iter()
            .filter_map(|(index, result)| {
                result.err().map(|error| {
                    (
                        index,
                        NodeFailure {
                            node: group.nodes[index].id.clone(),
                            error,
                        },
                    )
                })
            })
            .collect();

        if failures.is_empty() {
            tracing::info!(group = %group.id, "Node group destroyed");
            return Ok(());
        }

        failures.sort_by_key(|(index, _)| *index);
        tracing::error!(
            group = %group.id,
            failed = failures.len(),
            total = group.len(),
            "Node group teardown incomplete"
        );
        Err(LabError::Aggregate {
            group: group.id.clone(),
            failures: failures.into_iter().map(|(_, failure)| failure).collect(),
        })
    }
}
