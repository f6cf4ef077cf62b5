//! Node runtime -- wires the registry, listener, monitor and gossip tasks.
//!
//! `Node::start` binds the listener and spawns every background task;
//! `Node::shutdown` signals them all and waits for them to finish. The
//! binary and the integration harness both drive the node through here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostmesh_api::{AppState, PeerDetail};
use hostmesh_client::ServerSupervisor;
use hostmesh_registry::HostRegistry;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{NodeConfig, NodeMode, RuntimeTiming};
use crate::dispatcher::Dispatcher;
use crate::peer_sessions::PeerSessions;
use crate::{gossip_task, listener, monitor_task};

/// How long shutdown waits for each task before giving up on it.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to start a node, independent of where it came from.
#[derive(Debug, Clone)]
pub struct NodeParams {
    pub name: String,
    pub mode: NodeMode,
    pub listen_addr: String,
    pub peers: Vec<String>,
    /// Port used for peers configured without one.
    pub default_peer_port: u16,
    pub timing: RuntimeTiming,
}

impl NodeParams {
    pub fn from_config(cfg: &NodeConfig) -> Self {
        Self {
            name: cfg.node.name.clone(),
            mode: cfg.node.mode,
            listen_addr: cfg.network.listen_addr.clone(),
            peers: cfg.peer_addrs(),
            default_peer_port: cfg.listen_port(),
            timing: cfg.runtime_timing(),
        }
    }
}

/// A running registry node.
pub struct Node {
    name: String,
    mode: NodeMode,
    local_addr: SocketAddr,
    registry: HostRegistry,
    sessions: PeerSessions,
    start_time: Instant,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind the listener and spawn all background tasks. Gossip loops only
    /// run in peer mode.
    pub async fn start(
        params: NodeParams,
        supervisor: Option<Arc<dyn ServerSupervisor>>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&params.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            name = %params.name,
            mode = params.mode.as_str(),
            listen = %local_addr,
            peers = params.peers.len(),
            version = env!("CARGO_PKG_VERSION"),
            "starting hostmesh-node"
        );

        let registry = HostRegistry::new();
        let mut dispatcher = Dispatcher::new(registry.clone());
        if let Some(supervisor) = supervisor {
            dispatcher = dispatcher.with_supervisor(supervisor);
        }
        let sessions = PeerSessions::new(params.peers.clone(), params.default_peer_port);

        // Shutdown broadcast channel
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut handles = Vec::new();

        // Listener
        {
            let dispatcher = dispatcher.clone();
            let shutdown_tx = shutdown_tx.clone();
            handles.push(tokio::spawn(async move {
                listener::run_listener(listener, dispatcher, shutdown_tx).await;
            }));
        }

        // Heartbeat monitor
        {
            let registry = registry.clone();
            let shutdown = shutdown_tx.subscribe();
            let timing = params.timing;
            handles.push(tokio::spawn(async move {
                monitor_task::run_monitor_loop(
                    registry,
                    timing.monitor_interval,
                    timing.host_timeout,
                    shutdown,
                )
                .await;
            }));
        }

        if params.mode.gossips() {
            let timing = params.timing;

            let connector = {
                let dispatcher = dispatcher.clone();
                let sessions = sessions.clone();
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    gossip_task::run_connector_loop(
                        dispatcher,
                        sessions,
                        timing.peer_connect_interval,
                        timing.peer_connect_timeout,
                        shutdown,
                    )
                    .await;
                })
            };
            handles.push(connector);

            let broadcaster = {
                let registry = registry.clone();
                let sessions = sessions.clone();
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    gossip_task::run_broadcaster_loop(
                        registry,
                        sessions,
                        timing.peer_broadcast_interval,
                        timing.peer_connect_timeout,
                        shutdown,
                    )
                    .await;
                })
            };
            handles.push(broadcaster);
        } else if !params.peers.is_empty() {
            tracing::warn!(
                peers = params.peers.len(),
                "central mode: configured peers are ignored"
            );
        }

        Ok(Self {
            name: params.name,
            mode: params.mode,
            local_addr,
            registry,
            sessions,
            start_time: Instant::now(),
            shutdown_tx,
            handles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Address the registry listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// Add a gossip peer. The connector picks it up on its next tick.
    /// Always false in central mode.
    pub async fn add_peer(&self, addr: &str) -> bool {
        if !self.mode.gossips() {
            tracing::warn!(peer = addr, "central mode: add_peer ignored");
            return false;
        }
        self.sessions.add_peer(addr).await
    }

    /// Remove a gossip peer and drop its session.
    pub async fn remove_peer(&self, addr: &str) -> bool {
        self.sessions.remove_peer(addr).await
    }

    pub async fn peer_details(&self) -> Vec<PeerDetail> {
        self.sessions.peer_details().await
    }

    /// Number of live outbound gossip sessions.
    pub async fn live_sessions(&self) -> usize {
        self.sessions.live_count().await
    }

    /// API state backed by this node. Peer edits are only offered in peer
    /// mode.
    pub fn api_state(&self, bearer_token: String) -> Arc<AppState> {
        let sessions_for_list = self.sessions.clone();
        let peer_list_fn: hostmesh_api::PeerListFn = Box::new(move || {
            let sessions = sessions_for_list.clone();
            Box::pin(async move { sessions.peer_details().await })
        });

        let (peer_add_fn, peer_remove_fn) = if self.mode.gossips() {
            let sessions_for_add = self.sessions.clone();
            let sessions_for_remove = self.sessions.clone();
            let add: hostmesh_api::PeerEditFn = Box::new(move |addr: String| {
                let sessions = sessions_for_add.clone();
                Box::pin(async move { sessions.add_peer(&addr).await })
            });
            let remove: hostmesh_api::PeerEditFn = Box::new(move |addr: String| {
                let sessions = sessions_for_remove.clone();
                Box::pin(async move { sessions.remove_peer(&addr).await })
            });
            (Some(add), Some(remove))
        } else {
            (None, None)
        };

        Arc::new(AppState {
            registry: self.registry.clone(),
            node_name: self.name.clone(),
            mode: self.mode.as_str().to_string(),
            bearer_token,
            start_time: self.start_time,
            peer_list_fn: Some(peer_list_fn),
            peer_add_fn,
            peer_remove_fn,
        })
    }

    /// Serve the local HTTP API on `addr` until the node shuts down.
    /// Returns the bound address.
    pub async fn serve_api(&mut self, addr: &str, bearer_token: String) -> anyhow::Result<SocketAddr> {
        let router = hostmesh_api::router(self.api_state(bearer_token));
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        tracing::info!(addr = %bound, "API listening (HTTP)");

        let mut shutdown = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("API server error: {e}");
            }
        }));
        Ok(bound)
    }

    /// Stop accepting, signal every task, and wait for them to finish.
    pub async fn shutdown(self) {
        tracing::info!(name = %self.name, "shutting down...");
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            match tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("task ended abnormally: {e}"),
                Err(_) => tracing::warn!("task did not stop in time"),
            }
        }
        tracing::info!("shutdown complete");
    }
}
