//! HostClient against a real registry node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hostmesh_client::{
    HostClient, HostDescriptor, ServerCheck, ServerStatus, ServerSupervisor, StatusFields,
    SupervisorError,
};
use hostmesh_protocol::HostStatus;

use crate::harness::{wait_until, TestNodeBuilder};

fn descriptor(name: &str, address: &str) -> HostDescriptor {
    HostDescriptor {
        name: name.into(),
        address: address.into(),
        port: 25565,
    }
}

struct ToggleServer {
    running: AtomicBool,
}

impl ServerSupervisor for ToggleServer {
    fn start(&self) -> Result<(), SupervisorError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn stop(&self) -> Result<(), SupervisorError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
    fn send_command(&self, _command: &str) -> Result<(), SupervisorError> {
        Ok(())
    }
    fn status(&self) -> ServerStatus {
        ServerStatus {
            running: self.running.load(Ordering::SeqCst),
            players: vec!["steve".into(), "alex".into()],
            memory_usage: 3072.0,
            cpu_usage: 41.5,
        }
    }
}

#[tokio::test]
async fn test_client_lifecycle_against_node() {
    let node = TestNodeBuilder::new("registry").build().await.unwrap();

    let mut client = HostClient::new(node.addr.clone());
    client.connect(descriptor("alice", "10.0.0.5")).await.unwrap();
    assert!(client.is_connected());
    assert_eq!(node.registry().get("alice").unwrap().status, HostStatus::Online);

    client.notify_player_join("steve").await.unwrap();
    client.notify_player_join("steve").await.unwrap();
    assert_eq!(node.registry().get("alice").unwrap().players.len(), 1);

    client
        .update_status(StatusFields {
            players: vec!["steve".into(), "alex".into()],
            memory_usage: 2048.0,
            cpu_usage: 12.0,
            status: HostStatus::Online,
        })
        .await
        .unwrap();
    let alice = node.registry().get("alice").unwrap();
    assert_eq!(alice.players.len(), 2);
    assert_eq!(alice.memory_usage, 2048.0);

    client.notify_player_leave("alex").await.unwrap();
    assert!(!node.registry().get("alice").unwrap().players.contains("alex"));

    client.disconnect().await;
    assert!(!client.is_connected());
    client.disconnect().await;

    node.shutdown().await;
}

#[tokio::test]
async fn test_client_heartbeats_keep_host_online_until_disconnect() {
    let node = TestNodeBuilder::new("registry")
        .monitor(Duration::from_millis(20), Duration::from_millis(400))
        .build()
        .await
        .unwrap();

    let mut client =
        HostClient::new(node.addr.clone()).with_heartbeat_interval(Duration::from_millis(50));
    client.connect(descriptor("alice", "10.0.0.5")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(node.registry().get("alice").unwrap().status, HostStatus::Online);

    client.disconnect().await;
    let registry = node.registry().clone();
    wait_until(Duration::from_secs(3), "alice offline", || {
        registry.get("alice").map(|h| h.status) == Some(HostStatus::Offline)
    })
    .await
    .unwrap();

    node.shutdown().await;
}

#[tokio::test]
async fn test_client_failover_and_server_check() {
    let node = TestNodeBuilder::new("registry").build().await.unwrap();

    let mut carol = HostClient::new(node.addr.clone());
    carol.connect(descriptor("carol", "10.0.0.7")).await.unwrap();

    let mut bob = HostClient::new(node.addr.clone());
    bob.connect(descriptor("bob", "10.0.0.6")).await.unwrap();

    let candidate = bob.request_failover().await.unwrap().unwrap();
    assert_eq!(candidate.name, "carol");

    let server = ToggleServer {
        running: AtomicBool::new(true),
    };
    bob.report_server_status(&server).await.unwrap();
    assert_eq!(node.registry().get("bob").unwrap().cpu_usage, 41.5);

    assert_eq!(bob.check_server(&server, true).await.unwrap(), ServerCheck::Running);
    server.stop().unwrap();
    match bob.check_server(&server, true).await.unwrap() {
        ServerCheck::FailedOver(Some(next)) => assert_eq!(next.name, "carol"),
        other => panic!("expected failover to carol, got {other:?}"),
    }

    bob.disconnect().await;
    carol.disconnect().await;
    node.shutdown().await;
}

#[tokio::test]
async fn test_client_marks_itself_disconnected_when_registry_goes_away() {
    let node = TestNodeBuilder::new("registry").build().await.unwrap();

    let mut client = HostClient::new(node.addr.clone());
    client.connect(descriptor("alice", "10.0.0.5")).await.unwrap();

    node.shutdown().await;

    // The first send after the registry closed fails and flips the state
    let mut failed = false;
    for _ in 0..10 {
        if client.notify_player_join("steve").await.is_err() {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(failed);
    assert!(!client.is_connected());
}
