//! Group lifecycle scenarios: all-or-nothing creation and best-effort teardown.

#[cfg(test)]
mod tests {
    use crate::harness::FleetHarness;
    use p2plab_client::{InfraBackend, NodeProvider};
    use p2plab_types::{GroupId, LabError, NodeId};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    // ========================================================================
    // Creation
    // ========================================================================

    #[tokio::test]
    async fn provisioned_group_matches_definition() {
        let h = FleetHarness::new();

        let group = h.provision("bench", 4).await.unwrap();

        assert_eq!(group.len(), 4);
        assert_eq!(h.backend.list_nodes(&group.id).await.unwrap(), group.nodes);
        assert_eq!(h.fleet.nodes().len(), 4);
        assert_eq!(h.store.len(), 4);
    }

    #[tokio::test]
    async fn failed_member_leaves_nothing_behind() {
        let h = FleetHarness::new();
        h.backend.fail_allocation_at(2);

        let err = h.provision("bench", 5).await.unwrap_err();

        assert!(matches!(err, LabError::Provision { .. }));
        assert!(err.to_string().contains("bench"));
        assert!(h.backend.list_nodes(&GroupId::new("bench")).await.unwrap().is_empty());
        assert!(h.fleet.nodes().is_empty());
    }

    #[tokio::test]
    async fn cancelled_provisioning_leaves_nothing_behind() {
        let h = FleetHarness::new();
        h.backend.set_latency(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let id = GroupId::new("bench");
        let err = h
            .provider
            .create_node_group(&cancel, &id, &FleetHarness::definition(3))
            .await
            .unwrap_err();

        assert!(err.is_canceled());
        assert!(h.backend.list_nodes(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn distinct_groups_provision_concurrently() {
        let h = FleetHarness::new();

        let (a, b) = tokio::join!(h.provision("a", 3), h.provision("b", 2));

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
        assert_eq!(h.backend.len(), 5);
    }

    #[tokio::test]
    async fn in_flight_group_id_is_rejected() {
        let h = FleetHarness::new();
        h.backend.set_latency(Duration::from_millis(100));
        let id = GroupId::new("bench");
        let definition = FleetHarness::definition(2);

        let (first, second) = tokio::join!(
            h.provider.create_node_group(&h.cancel, &id, &definition),
            h.provider.create_node_group(&h.cancel, &id, &definition),
        );

        assert_eq!(first.unwrap().len(), 2);
        assert!(matches!(second, Err(LabError::Validation { .. })));
        assert_eq!(h.backend.list_nodes(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn existing_group_id_is_left_untouched() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 2).await.unwrap();

        let err = h.provision("bench", 3).await.unwrap_err();

        assert!(matches!(err, LabError::Validation { .. }));
        assert_eq!(h.backend.list_nodes(&group.id).await.unwrap(), group.nodes);
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    #[tokio::test]
    async fn teardown_failure_names_only_the_failing_node() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 3).await.unwrap();
        let second = group.nodes[1].id.clone();
        h.backend.fail_deallocation_of(second.clone());

        let err = h.fleet.teardown(&h.cancel, &group).await.unwrap_err();

        match &err {
            LabError::Aggregate { group: id, failures } => {
                assert_eq!(id, &group.id);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].node, second);
            }
            other => panic!("expected aggregate error, got {:?}", other),
        }
        assert!(err.to_string().contains(second.as_str()));

        let left = h.backend.list_nodes(&group.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, second);
    }

    #[tokio::test]
    async fn teardown_can_be_retried_until_clean() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 3).await.unwrap();
        h.backend.fail_deallocation_of("bench-0");

        assert!(h.fleet.teardown(&h.cancel, &group).await.is_err());
        h.backend.clear_faults();
        h.fleet.teardown(&h.cancel, &group).await.unwrap();

        assert!(h.backend.is_empty());
        assert_eq!(h.backend.deallocation_attempts(&NodeId::new("bench-0")), 2);
        assert_eq!(h.backend.deallocation_attempts(&NodeId::new("bench-1")), 2);
    }

    #[tokio::test]
    async fn failed_teardown_reports_every_failure_in_group_order() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 4).await.unwrap();
        h.backend.fail_deallocation_of("bench-3");
        h.backend.fail_deallocation_of("bench-0");

        let err = h
            .provider
            .destroy_node_group(&h.cancel, &group)
            .await
            .unwrap_err();

        match err {
            LabError::Aggregate { failures, .. } => {
                let ids: Vec<_> = failures.iter().map(|f| f.node.to_string()).collect();
                assert_eq!(ids, vec!["bench-0", "bench-3"]);
            }
            other => panic!("expected aggregate error, got {:?}", other),
        }
    }
}
