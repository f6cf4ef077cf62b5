//! Test harness for in-process hostmesh-node integration tests.
//!
//! Provides TestNode (a running node on 127.0.0.1:0), TestNodeBuilder
//! (mode, peers, millisecond timing), and RawConn (a bare framed TCP
//! connection for driving the wire protocol by hand).

use std::net::SocketAddr;
use std::time::Duration;

use hostmesh_node::config::{NodeMode, RuntimeTiming};
use hostmesh_node::{Node, NodeParams};
use hostmesh_protocol::{
    read_message, write_message, Heartbeat, Message, ProtocolError, Register,
};
use hostmesh_registry::HostRegistry;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub const TEST_TOKEN: &str = "integration-test-token";

/// Timing fast enough for tests but slow enough not to demote hosts by
/// accident.
pub fn fast_timing() -> RuntimeTiming {
    RuntimeTiming {
        monitor_interval: Duration::from_millis(50),
        host_timeout: Duration::from_secs(60),
        peer_connect_interval: Duration::from_millis(100),
        peer_broadcast_interval: Duration::from_millis(100),
        peer_connect_timeout: Duration::from_secs(1),
    }
}

/// A running in-process node.
pub struct TestNode {
    pub addr: String,
    pub api_addr: Option<String>,
    pub bearer_token: String,
    node: Node,
}

#[allow(dead_code)]
impl TestNode {
    pub fn registry(&self) -> &HostRegistry {
        self.node.registry()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.node.local_addr()
    }

    pub async fn shutdown(self) {
        self.node.shutdown().await;
    }

    /// Open a raw protocol connection to this node.
    pub async fn connect(&self) -> anyhow::Result<RawConn> {
        RawConn::connect(&self.addr).await
    }

    /// Register a host over the wire and return the response.
    pub async fn register(&self, name: &str, address: &str, port: u16) -> anyhow::Result<Message> {
        let mut conn = self.connect().await?;
        conn.request(&Message::Register(Register {
            name: name.into(),
            address: address.into(),
            port,
        }))
        .await
    }

    /// Poll until this node's registry knows `name`, or timeout.
    pub async fn wait_host(&self, name: &str, timeout: Duration) -> anyhow::Result<()> {
        let registry = self.registry().clone();
        wait_until(timeout, &format!("host {name}"), || registry.get(name).is_some()).await
    }

    /// Poll until this node has exactly `n` live gossip sessions, or timeout.
    pub async fn wait_sessions(&self, n: usize, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let live = self.node.live_sessions().await;
            if live == n {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("timeout waiting for {n} live sessions (have {live})");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// POST to the node API, returning (status_code, body_json).
    pub async fn api_post_raw(
        &self,
        path: &str,
        body: serde_json::Value,
        token: &str,
    ) -> anyhow::Result<(u16, serde_json::Value)> {
        let api_addr = self
            .api_addr
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("node built without API"))?;
        let url = format!("http://{api_addr}{path}");
        let resp = reqwest::Client::new()
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let json = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        Ok((status, json))
    }

    /// POST to the node API with the right token, failing on non-2xx.
    pub async fn api_post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let (status, json) = self.api_post_raw(path, body, &self.bearer_token).await?;
        if !(200..300).contains(&status) {
            anyhow::bail!("{path} returned {status}: {json}");
        }
        Ok(json)
    }
}

/// Builder for TestNode.
pub struct TestNodeBuilder {
    name: String,
    mode: NodeMode,
    peers: Vec<String>,
    timing: RuntimeTiming,
    with_api: bool,
}

#[allow(dead_code)]
impl TestNodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: NodeMode::Peer,
            peers: Vec::new(),
            timing: fast_timing(),
            with_api: false,
        }
    }

    pub fn mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn peer(mut self, addr: &str) -> Self {
        self.peers.push(addr.to_string());
        self
    }

    pub fn monitor(mut self, interval: Duration, host_timeout: Duration) -> Self {
        self.timing.monitor_interval = interval;
        self.timing.host_timeout = host_timeout;
        self
    }

    pub fn gossip(mut self, connect_interval: Duration, broadcast_interval: Duration) -> Self {
        self.timing.peer_connect_interval = connect_interval;
        self.timing.peer_broadcast_interval = broadcast_interval;
        self
    }

    pub fn with_api(mut self) -> Self {
        self.with_api = true;
        self
    }

    pub async fn build(self) -> anyhow::Result<TestNode> {
        let params = NodeParams {
            name: self.name,
            mode: self.mode,
            listen_addr: "127.0.0.1:0".into(),
            peers: self.peers,
            default_peer_port: hostmesh_protocol::DEFAULT_REGISTRY_PORT,
            timing: self.timing,
        };
        let mut node = Node::start(params, None).await?;
        let addr = node.local_addr().to_string();

        let api_addr = if self.with_api {
            let bound = node
                .serve_api("127.0.0.1:0", TEST_TOKEN.to_string())
                .await?;
            Some(bound.to_string())
        } else {
            None
        };

        Ok(TestNode {
            addr,
            api_addr,
            bearer_token: TEST_TOKEN.to_string(),
            node,
        })
    }
}

/// A bare framed connection to a node's registry listener.
pub struct RawConn {
    stream: TcpStream,
}

#[allow(dead_code)]
impl RawConn {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, message: &Message) -> anyhow::Result<()> {
        write_message(&mut self.stream, message).await?;
        Ok(())
    }

    /// Write arbitrary bytes, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Write a frame around an arbitrary JSON payload.
    pub async fn send_json(&mut self, payload: &str) -> anyhow::Result<()> {
        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(payload.as_bytes());
        self.send_raw(&frame).await
    }

    /// Read one frame, with a timeout so a missing response fails the test.
    pub async fn recv(&mut self) -> Result<Message, ProtocolError> {
        match tokio::time::timeout(Duration::from_secs(5), read_message(&mut self.stream)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no response within 5s",
            ))),
        }
    }

    pub async fn request(&mut self, message: &Message) -> anyhow::Result<Message> {
        self.send(message).await?;
        Ok(self.recv().await?)
    }

    pub async fn heartbeat(&mut self, name: &str) -> anyhow::Result<Message> {
        self.request(&Message::Heartbeat(Heartbeat { name: name.into() }))
            .await
    }

    /// Half-close our side of the stream.
    pub async fn close_write(&mut self) -> anyhow::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Poll a synchronous condition until it holds, or fail after `timeout`.
pub async fn wait_until<F>(timeout: Duration, what: &str, mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timeout waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
