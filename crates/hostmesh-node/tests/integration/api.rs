//! Local HTTP API served by a running node.

use std::time::Duration;

use hostmesh_node::config::NodeMode;
use hostmesh_protocol::HostStatus;
use serde_json::json;

use crate::harness::TestNodeBuilder;

#[tokio::test]
async fn test_status_reports_counts_and_mode() {
    let node = TestNodeBuilder::new("api-node").with_api().build().await.unwrap();
    node.register("alice", "10.0.0.5", 25565).await.unwrap();
    node.register("bob", "10.0.0.6", 25565).await.unwrap();

    let status = node.api_post("/api/v1/status", json!({})).await.unwrap();
    assert_eq!(status["node_name"], "api-node");
    assert_eq!(status["mode"], "peer");
    assert_eq!(status["hosts_online"], 2);
    assert_eq!(status["hosts_offline"], 0);
    assert_eq!(status["peers_configured"], 0);

    node.shutdown().await;
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let node = TestNodeBuilder::new("api-node").with_api().build().await.unwrap();

    let (code, _) = node
        .api_post_raw("/api/v1/hosts", json!({}), "not-the-token")
        .await
        .unwrap();
    assert_eq!(code, 401);

    node.shutdown().await;
}

#[tokio::test]
async fn test_hosts_add_list_remove() {
    let node = TestNodeBuilder::new("api-node").with_api().build().await.unwrap();

    let added = node
        .api_post(
            "/api/v1/hosts/add",
            json!({ "name": "dave", "address": "10.0.0.8" }),
        )
        .await
        .unwrap();
    assert_eq!(added["created"], true);
    let dave = node.registry().get("dave").unwrap();
    assert_eq!(dave.port, 25565);
    assert_eq!(dave.status, HostStatus::Online);

    let hosts = node.api_post("/api/v1/hosts", json!({})).await.unwrap();
    assert_eq!(hosts["hosts"].as_array().unwrap().len(), 1);
    assert_eq!(hosts["hosts"][0]["name"], "dave");

    node.api_post("/api/v1/hosts/remove", json!({ "name": "dave" }))
        .await
        .unwrap();
    assert!(node.registry().get("dave").is_none());

    let (code, _) = node
        .api_post_raw(
            "/api/v1/hosts/remove",
            json!({ "name": "dave" }),
            &node.bearer_token,
        )
        .await
        .unwrap();
    assert_eq!(code, 404);

    node.shutdown().await;
}

#[tokio::test]
async fn test_failover_endpoint() {
    let node = TestNodeBuilder::new("api-node").with_api().build().await.unwrap();
    node.register("alice", "10.0.0.5", 25565).await.unwrap();

    let resp = node
        .api_post("/api/v1/failover", json!({ "exclude": "alice" }))
        .await
        .unwrap();
    assert!(resp["candidate"].is_null());

    node.register("carol", "10.0.0.7", 25565).await.unwrap();
    let resp = node
        .api_post("/api/v1/failover", json!({ "exclude": "alice" }))
        .await
        .unwrap();
    assert_eq!(resp["candidate"]["name"], "carol");

    node.shutdown().await;
}

#[tokio::test]
async fn test_peers_added_through_api_get_dialled() {
    let node_a = TestNodeBuilder::new("node-a").build().await.unwrap();
    node_a.register("alice", "10.0.0.5", 25565).await.unwrap();
    let node_b = TestNodeBuilder::new("node-b").with_api().build().await.unwrap();
    node_b.register("bob", "10.0.0.6", 25565).await.unwrap();

    let resp = node_b
        .api_post("/api/v1/peers/add", json!({ "addr": node_a.addr.as_str() }))
        .await
        .unwrap();
    assert_eq!(resp["changed"], true);

    node_b.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    node_a.wait_host("bob", Duration::from_secs(5)).await.unwrap();

    let peers = node_b.api_post("/api/v1/peers", json!({})).await.unwrap();
    assert_eq!(peers["peers"][0]["addr"], node_a.addr.as_str());
    assert_eq!(peers["peers"][0]["connected"], true);

    let resp = node_b
        .api_post("/api/v1/peers/remove", json!({ "addr": node_a.addr.as_str() }))
        .await
        .unwrap();
    assert_eq!(resp["changed"], true);
    node_b.wait_sessions(0, Duration::from_secs(5)).await.unwrap();

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_central_node_refuses_peer_edits() {
    let node = TestNodeBuilder::new("central")
        .mode(NodeMode::Central)
        .with_api()
        .build()
        .await
        .unwrap();

    let (code, _) = node
        .api_post_raw(
            "/api/v1/peers/add",
            json!({ "addr": "10.0.0.9:25566" }),
            &node.bearer_token,
        )
        .await
        .unwrap();
    assert_eq!(code, 503);

    let status = node.api_post("/api/v1/status", json!({})).await.unwrap();
    assert_eq!(status["mode"], "central");

    node.shutdown().await;
}
