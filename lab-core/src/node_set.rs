//! Concurrency-safe registry of live node handles.
//!
//! A [`NodeSet`] maps node ids to shared handles. It is generic over any
//! handle type that can report its [`NodeMetadata`], including trait objects
//! such as `dyn Node` from p2plab-client.
//!
//! All operations take one mutex over the map and never fail: absence is
//! returned as data (`None` / `false`), not as an error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use p2plab_types::{NodeId, NodeMetadata};

/// Anything that can report the metadata of the node it stands for.
pub trait NodeIdentity {
    /// Metadata of the node.
    fn metadata(&self) -> &NodeMetadata;

    /// Node id (shorthand for `metadata().id`).
    fn id(&self) -> &NodeId {
        &self.metadata().id
    }
}

impl NodeIdentity for NodeMetadata {
    fn metadata(&self) -> &NodeMetadata {
        self
    }
}

/// A set of unique nodes, keyed by node id.
pub struct NodeSet<N: ?Sized> {
    nodes: Mutex<BTreeMap<NodeId, Arc<N>>>,
}

impl<N: ?Sized + NodeIdentity> NodeSet<N> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned guard is still safe to use.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<NodeId, Arc<N>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node. If a node with the same id is already present the set is
    /// left unchanged.
    ///
    /// Returns true if the node was inserted.
    pub fn add(&self, node: Arc<N>) -> bool {
        let mut nodes = self.lock();
        if nodes.contains_key(node.id()) {
            return false;
        }
        nodes.insert(node.id().clone(), node);
        true
    }

    /// Return the handle already registered under the node's id, or insert
    /// `node` and return it.
    pub fn get_or_insert(&self, node: Arc<N>) -> Arc<N> {
        let mut nodes = self.lock();
        Arc::clone(nodes.entry(node.id().clone()).or_insert(node))
    }

    /// Insert `node`, replacing any handle registered under the same id.
    ///
    /// Returns the replaced handle.
    pub fn replace(&self, node: Arc<N>) -> Option<Arc<N>> {
        self.lock().insert(node.id().clone(), node)
    }

    /// Remove a node by its id. No-op if it is not present.
    ///
    /// Returns true if a node was removed.
    pub fn remove(&self, node: &N) -> bool {
        self.remove_id(node.id()).is_some()
    }

    /// Remove and return the node registered under `id`, if any.
    pub fn remove_id(&self, id: &NodeId) -> Option<Arc<N>> {
        self.lock().remove(id)
    }

    /// Check whether a node with the same id is present.
    pub fn contains(&self, node: &N) -> bool {
        self.lock().contains_key(node.id())
    }

    /// Look up a node by id.
    pub fn get(&self, id: &NodeId) -> Option<Arc<N>> {
        self.lock().get(id).cloned()
    }

    /// Snapshot of the nodes currently in the set, ordered by id.
    ///
    /// Later changes to the set do not affect a returned snapshot.
    pub fn slice(&self) -> Vec<Arc<N>> {
        self.lock().values().cloned().collect()
    }

    /// Number of nodes in the set.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<N: ?Sized + NodeIdentity> Default for NodeSet<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: ?Sized + NodeIdentity> fmt::Debug for NodeSet<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.lock();
        f.debug_struct("NodeSet")
            .field("ids", &nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
