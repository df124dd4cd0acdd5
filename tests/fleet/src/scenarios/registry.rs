//! Registry scenarios: node sets holding live handles and lookup by
//! (cluster, id).

#[cfg(test)]
mod tests {
    use crate::harness::FleetHarness;
    use p2plab_client::{Application, LabNodeApi, Node, NodeApi, RemoteNode};
    use p2plab_core::{NodeIdentity, NodeSet};
    use p2plab_types::{ClusterId, LabError, NodeId, NodeMetadata};
    use std::sync::Arc;

    fn handles(h: &FleetHarness) -> Vec<Arc<RemoteNode>> {
        h.fleet.nodes().slice()
    }

    // ========================================================================
    // NodeSet over live handles
    // ========================================================================

    #[tokio::test]
    async fn adding_the_same_node_twice_keeps_one_entry() {
        let h = FleetHarness::new();
        h.provision("bench", 2).await.unwrap();
        let set: NodeSet<dyn Node> = NodeSet::new();
        let first = handles(&h).remove(0);

        assert!(set.add(first.clone()));
        assert!(!set.add(first));
        assert_eq!(set.slice().len(), 1);
    }

    #[tokio::test]
    async fn lookup_by_id_in_a_two_node_set() {
        let h = FleetHarness::new();
        h.provision("bench", 2).await.unwrap();
        let set: NodeSet<dyn Node> = NodeSet::new();
        for node in handles(&h) {
            set.add(node);
        }

        let found = set.get(&NodeId::new("bench-0")).unwrap();
        assert_eq!(found.id().as_str(), "bench-0");
        assert!(set.get(&NodeId::new("bench-7")).is_none());
    }

    #[tokio::test]
    async fn removing_an_absent_node_is_a_no_op() {
        let h = FleetHarness::new();
        h.provision("bench", 2).await.unwrap();
        let set: NodeSet<dyn Node> = NodeSet::new();
        let mut nodes = handles(&h).into_iter();
        let (kept, absent) = (nodes.next().unwrap(), nodes.next().unwrap());
        set.add(kept);

        assert!(!set.remove(&*absent));
        assert!(!set.contains(&*absent));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn fleet_slice_is_a_snapshot() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 3).await.unwrap();
        let snapshot = h.fleet.nodes().slice();

        h.fleet.teardown(&h.cancel, &group).await.unwrap();

        assert_eq!(snapshot.len(), 3);
        assert!(h.fleet.nodes().is_empty());
        assert!(snapshot.iter().all(|n| n.state().is_destroyed()));
    }

    // ========================================================================
    // LabNodeApi
    // ========================================================================

    #[tokio::test]
    async fn api_returns_the_fleet_handle() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 3).await.unwrap();
        let dials = h.dialer.dial_count();

        let node = h
            .api
            .get(&h.cancel, &ClusterId::new("bench"), &group.nodes[2].id)
            .await
            .unwrap();

        assert_eq!(node.id(), &group.nodes[2].id);
        assert_eq!(h.dialer.dial_count(), dials);
        let record = node.peer_info(&h.cancel).await.unwrap();
        assert!(!record.peer_id.is_empty());
    }

    #[tokio::test]
    async fn api_binds_nodes_it_has_not_seen() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();
        let api = LabNodeApi::new(
            h.store.clone(),
            h.dialer.clone(),
            Arc::new(h.launcher.clone()),
            Default::default(),
        );
        let cluster = ClusterId::new("bench");

        let node = api.get(&h.cancel, &cluster, &group.nodes[0].id).await.unwrap();

        assert_eq!(node.metadata(), &group.nodes[0]);
        assert_eq!(api.node_set(&cluster).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_handle() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();
        let api = LabNodeApi::new(
            h.store.clone(),
            h.dialer.clone(),
            Arc::new(h.launcher.clone()),
            Default::default(),
        );
        let cluster = ClusterId::new("bench");
        let id = &group.nodes[0].id;

        let (a, b) = tokio::join!(
            api.get(&h.cancel, &cluster, id),
            api.get(&h.cancel, &cluster, id),
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(api.node_set(&cluster).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn api_unknown_node_is_not_found() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();

        let err = h
            .api
            .get(&h.cancel, &ClusterId::new("bench"), &NodeId::new("bench-9"))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::NotFound { .. }));

        // Right id, wrong cluster
        let err = h
            .api
            .get(&h.cancel, &ClusterId::new("other"), &group.nodes[0].id)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn api_does_not_return_nodes_of_another_group() {
        let h = FleetHarness::new();
        h.provision("a", 1).await.unwrap();
        h.provision("b", 1).await.unwrap();

        // Both groups share the fleet's handle set; b-0 is cached there.
        assert!(h.fleet.nodes().get(&NodeId::new("b-0")).is_some());

        let err = h
            .api
            .get(&h.cancel, &ClusterId::new("a"), &NodeId::new("b-0"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let node = h
            .api
            .get(&h.cancel, &ClusterId::new("b"), &NodeId::new("b-0"))
            .await
            .unwrap();
        assert_eq!(node.metadata().cluster.as_str(), "b");
    }

    #[tokio::test]
    async fn api_unreachable_node_is_connectivity_error() {
        let h = FleetHarness::new();
        h.store.put(NodeMetadata::new("lost-0", "lost", "10.9.9.9", "10.9.9.9:7001"));
        h.dialer.set_unreachable("10.9.9.9:7001");

        let err = h
            .api
            .get(&h.cancel, &ClusterId::new("lost"), &NodeId::new("lost-0"))
            .await
            .unwrap_err();

        match err {
            LabError::Connectivity { node, address, .. } => {
                assert_eq!(node.as_str(), "lost-0");
                assert_eq!(address, "10.9.9.9:7001");
            }
            other => panic!("expected connectivity error, got {:?}", other),
        }
    }
}
