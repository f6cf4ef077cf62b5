//! Peer gossip between in-process nodes.

use std::time::Duration;

use hostmesh_node::config::NodeMode;
use hostmesh_protocol::{Ack, HostRecord, HostSnapshot, Message};

use crate::harness::TestNodeBuilder;

const CONVERGE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_two_nodes_exchange_hosts() {
    let node_a = TestNodeBuilder::new("node-a").build().await.unwrap();
    node_a.register("alice", "10.0.0.5", 25565).await.unwrap();

    let node_b = TestNodeBuilder::new("node-b")
        .peer(&node_a.addr)
        .build()
        .await
        .unwrap();
    node_b.register("bob", "10.0.0.6", 25565).await.unwrap();

    // B dials A: A learns bob from B's snapshots
    node_b.wait_sessions(1, CONVERGE).await.unwrap();
    node_a.wait_host("bob", CONVERGE).await.unwrap();

    // A only acks on B's session; alice reaches B once A dials B too
    assert!(node_b.registry().get("alice").is_none());
    assert!(node_a.node().add_peer(&node_b.addr).await);
    node_b.wait_host("alice", CONVERGE).await.unwrap();

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_peer_gossip_never_overrides_local_record() {
    let node_a = TestNodeBuilder::new("node-a").build().await.unwrap();
    node_a.register("alice", "10.0.0.5", 25565).await.unwrap();
    node_a.register("carol", "10.0.0.7", 25565).await.unwrap();

    let node_b = TestNodeBuilder::new("node-b").build().await.unwrap();
    node_b.register("alice", "192.168.1.50", 25565).await.unwrap();

    assert!(node_a.node().add_peer(&node_b.addr).await);
    node_b.wait_host("carol", CONVERGE).await.unwrap();

    // Let a few sync rounds pass
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(node_b.registry().get("alice").unwrap().address, "192.168.1.50");
    assert_eq!(node_a.registry().get("alice").unwrap().address, "10.0.0.5");

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_inbound_peer_sync_over_raw_connection() {
    let node = TestNodeBuilder::new("registry").build().await.unwrap();
    node.register("alice", "10.0.0.5", 25565).await.unwrap();

    let now = chrono::Utc::now();
    let mut conn = node.connect().await.unwrap();
    let resp = conn
        .request(&Message::PeerSync(HostSnapshot {
            hosts: vec![
                HostRecord::new("alice", "172.16.0.9", 25565, now),
                HostRecord::new("dave", "10.0.0.8", 25565, now),
            ],
        }))
        .await
        .unwrap();
    assert_eq!(resp, Message::PeerSyncResponse(Ack::OK));

    assert_eq!(node.registry().get("alice").unwrap().address, "10.0.0.5");
    assert_eq!(node.registry().get("dave").unwrap().address, "10.0.0.8");

    node.shutdown().await;
}

#[tokio::test]
async fn test_runtime_add_and_remove_peer() {
    let node_a = TestNodeBuilder::new("node-a").build().await.unwrap();
    let node_b = TestNodeBuilder::new("node-b").build().await.unwrap();

    assert!(node_b.node().add_peer(&node_a.addr).await);
    assert!(!node_b.node().add_peer(&node_a.addr).await);
    node_b.wait_sessions(1, CONVERGE).await.unwrap();

    let details = node_b.node().peer_details().await;
    assert_eq!(details.len(), 1);
    assert!(details[0].connected);

    assert!(node_b.node().remove_peer(&node_a.addr).await);
    node_b.wait_sessions(0, CONVERGE).await.unwrap();
    assert!(node_b.node().peer_details().await.is_empty());

    // Not redialled after removal
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node_b.node().live_sessions().await, 0);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_session_dropped_when_peer_shuts_down() {
    let node_a = TestNodeBuilder::new("node-a").build().await.unwrap();
    let a_addr = node_a.addr.clone();

    let node_b = TestNodeBuilder::new("node-b")
        .peer(&a_addr)
        .build()
        .await
        .unwrap();
    node_b.wait_sessions(1, CONVERGE).await.unwrap();

    node_a.shutdown().await;
    node_b.wait_sessions(0, CONVERGE).await.unwrap();

    // Failed dials are retried each tick without crashing the connector
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node_b.node().peer_details().await.len(), 1);

    node_b.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_peer_does_not_block_others() {
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap().to_string();
    drop(dead);

    let node_a = TestNodeBuilder::new("node-a").build().await.unwrap();
    node_a.register("alice", "10.0.0.5", 25565).await.unwrap();

    let node_b = TestNodeBuilder::new("node-b")
        .peer(&dead_addr)
        .peer(&node_a.addr)
        .build()
        .await
        .unwrap();
    node_b.wait_sessions(1, CONVERGE).await.unwrap();

    let details = node_b.node().peer_details().await;
    assert_eq!(details.len(), 2);
    assert_eq!(details.iter().filter(|d| d.connected).count(), 1);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_central_mode_does_not_gossip() {
    let node_a = TestNodeBuilder::new("node-a").build().await.unwrap();

    let central = TestNodeBuilder::new("central")
        .mode(NodeMode::Central)
        .peer(&node_a.addr)
        .build()
        .await
        .unwrap();
    central.register("bob", "10.0.0.6", 25565).await.unwrap();

    assert!(!central.node().add_peer("10.9.9.9:25566").await);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(central.node().live_sessions().await, 0);
    assert!(node_a.registry().get("bob").is_none());

    // Central nodes still accept inbound gossip
    node_a.register("alice", "10.0.0.5", 25565).await.unwrap();
    assert!(node_a.node().add_peer(&central.addr).await);
    central.wait_host("alice", CONVERGE).await.unwrap();

    node_a.shutdown().await;
    central.shutdown().await;
}
