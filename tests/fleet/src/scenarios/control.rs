//! Control scenarios: management- and data-plane calls on live nodes.

#[cfg(test)]
mod tests {
    use crate::harness::FleetHarness;
    use p2plab_client::{Agent, Application, ControlConfig, LabConfig};
    use p2plab_core::{with_port, with_user, NodeState, SshOption, SshSettings};
    use p2plab_types::{CancelReason, LabError, Request, Task, TaskKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn failing() -> SshOption {
        Box::new(|_: &mut SshSettings| Err(LabError::validation("ssh option", "agent has no keys")))
    }

    fn quick_abort() -> FleetHarness {
        FleetHarness::with_config(LabConfig {
            control: ControlConfig {
                abort_timeout_ms: 50,
                ..ControlConfig::default()
            },
            ..LabConfig::default()
        })
    }

    // ========================================================================
    // Agent
    // ========================================================================

    #[tokio::test]
    async fn update_reaches_every_member() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 3).await.unwrap();

        for node in h.fleet.members(&group) {
            node.update(&h.cancel, "https://builds.example.com/app-1.2.0.tar.gz")
                .await
                .unwrap();
        }

        let updates = h
            .agent
            .requests()
            .into_iter()
            .filter(|r| matches!(r, Request::Update { .. }))
            .count();
        assert_eq!(updates, 3);
    }

    #[tokio::test]
    async fn failed_update_is_reported_and_node_stays_usable() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();
        h.agent.reject_updates_containing("broken");
        let members = h.fleet.members(&group);
        let node = &members[0];

        let err = node
            .update(&h.cancel, "https://builds.example.com/broken.tar.gz")
            .await
            .unwrap_err();

        assert!(matches!(err, LabError::Remote { .. }));
        assert_eq!(node.state(), NodeState::Live { runs: 0 });
        node.peer_info(&h.cancel).await.unwrap();
    }

    #[tokio::test]
    async fn update_during_run_is_busy() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();
        let node = Arc::clone(&h.fleet.members(&group)[0]);
        h.transport(&group.nodes[0]).set_latency(Duration::from_millis(200));

        let runner = {
            let node = Arc::clone(&node);
            tokio::spawn(async move {
                node.run(&CancellationToken::new(), &Task::new(TaskKind::Get, "bafy"))
                    .await
            })
        };
        while node.state() != (NodeState::Live { runs: 1 }) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = node.update(&h.cancel, "https://builds/app").await.unwrap_err();
        assert!(matches!(err, LabError::Busy { .. }));

        runner.await.unwrap().unwrap();
        assert_eq!(node.state(), NodeState::Live { runs: 0 });
    }

    #[tokio::test]
    async fn failing_ssh_option_stops_the_chain() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();
        let members = h.fleet.members(&group);
        let node = &members[0];

        let err = node
            .ssh(&h.cancel, &[with_user("x"), failing(), with_port(22)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("agent has no keys"));
        assert!(h.launcher.sessions().is_empty());

        let mut settings = SshSettings::default();
        assert!(settings.apply(&[with_user("x"), failing(), with_port(22)]).is_err());
        assert_eq!(settings.user.as_deref(), Some("x"));
        assert_eq!(settings.port, None);
    }

    #[tokio::test]
    async fn ssh_opens_one_session_with_applied_settings() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 2).await.unwrap();
        let members = h.fleet.members(&group);
        let node = &members[1];

        node.ssh(&h.cancel, &[with_user("ubuntu"), with_port(2222)])
            .await
            .unwrap();

        let sessions = h.launcher.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].0, group.nodes[1].id);
        assert_eq!(sessions[0].1.port, Some(2222));
    }

    // ========================================================================
    // Application
    // ========================================================================

    #[tokio::test]
    async fn run_with_cancelled_token_sends_nothing() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();
        let members = h.fleet.members(&group);
        let node = &members[0];
        let transport = h.transport(&group.nodes[0]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = node
            .run(&cancel, &Task::new(TaskKind::Connect, "12D3KooWPeer"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LabError::Canceled {
                reason: CancelReason::Canceled,
                ..
            }
        ));
        assert!(transport.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn cancelling_a_run_aborts_the_task_on_the_node() {
        let h = quick_abort();
        let group = h.provision("bench", 1).await.unwrap();
        let members = h.fleet.members(&group);
        let node = &members[0];
        h.transport(&group.nodes[0]).set_latency(Duration::from_secs(10));
        let task = Task::new(TaskKind::Get, "bafy");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = node.run(&cancel, &task).await.unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(h.agent.aborts(), vec![Request::Abort { task_id: task.id }]);
        assert_eq!(node.state(), NodeState::Live { runs: 0 });
    }

    #[tokio::test]
    async fn peer_info_is_live() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 1).await.unwrap();
        let members = h.fleet.members(&group);
        let node = &members[0];

        node.peer_info(&h.cancel).await.unwrap();
        node.peer_info(&h.cancel).await.unwrap();

        let queries = h
            .agent
            .requests()
            .into_iter()
            .filter(|r| matches!(r, Request::PeerInfo))
            .count();
        assert_eq!(queries, 2);
    }

    // ========================================================================
    // Destroyed
    // ========================================================================

    #[tokio::test]
    async fn destroyed_nodes_are_gone_without_io() {
        let h = FleetHarness::new();
        let group = h.provision("bench", 2).await.unwrap();
        let members = h.fleet.members(&group);
        h.fleet.teardown(&h.cancel, &group).await.unwrap();
        let before = h.agent.requests().len();

        for node in &members {
            assert!(matches!(
                node.update(&h.cancel, "https://builds/app").await,
                Err(LabError::Gone { .. })
            ));
            assert!(matches!(
                node.run(&h.cancel, &Task::new(TaskKind::Disconnect, "")).await,
                Err(LabError::Gone { .. })
            ));
            assert!(matches!(node.peer_info(&h.cancel).await, Err(LabError::Gone { .. })));
            assert!(matches!(node.ssh(&h.cancel, &[]).await, Err(LabError::Gone { .. })));
        }

        assert_eq!(h.agent.requests().len(), before);
        assert!(h.launcher.sessions().is_empty());
    }
}
