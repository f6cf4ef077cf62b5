//! hostmesh API -- local node HTTP API.
//!
//! HTTP on 127.0.0.1:25567 by default. Bearer token auth from
//! ~/.hostmesh/node-token. Every route is a POST with a JSON body, and every
//! route maps onto one registry or peer-list operation.

use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use hostmesh_protocol::{HostEndpoint, HostRecord, DEFAULT_GAME_PORT};
use hostmesh_registry::{HostRegistry, UpsertOutcome};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Configured peer as reported by the node's gossip engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerDetail {
    pub addr: String,
    pub connected: bool,
    pub connected_secs: Option<u64>,
}

/// Callback to list configured peers and their session state.
pub type PeerListFn =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Vec<PeerDetail>> + Send>> + Send + Sync>;

/// Callback to add or remove a peer address. Returns whether anything changed.
pub type PeerEditFn =
    Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Shared state for all API handlers.
pub struct AppState {
    pub registry: HostRegistry,
    pub node_name: String,
    pub mode: String,
    pub bearer_token: String,
    pub start_time: std::time::Instant,
    pub peer_list_fn: Option<PeerListFn>,
    pub peer_add_fn: Option<PeerEditFn>,
    pub peer_remove_fn: Option<PeerEditFn>,
}

/// Build the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/status", post(status))
        .route("/api/v1/hosts", post(hosts_list))
        .route("/api/v1/hosts/add", post(hosts_add))
        .route("/api/v1/hosts/remove", post(hosts_remove))
        .route("/api/v1/peers", post(peers_list))
        .route("/api/v1/peers/add", post(peers_add))
        .route("/api/v1/peers/remove", post(peers_remove))
        .route("/api/v1/failover", post(failover))
        .with_state(state)
}

// ============================================================================
// Auth middleware (inline check)
// ============================================================================

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, &'static str)> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let expected = format!("Bearer {}", state.bearer_token);
    if auth != expected {
        return Err((StatusCode::UNAUTHORIZED, "invalid bearer token"));
    }
    Ok(())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_name: String,
    pub mode: String,
    pub uptime_secs: u64,
    pub hosts_online: usize,
    pub hosts_offline: usize,
    pub peers_configured: usize,
    pub peers_connected: usize,
}

#[derive(Serialize, Deserialize)]
pub struct HostsResponse {
    pub hosts: Vec<HostRecord>,
}

fn default_port() -> u16 {
    DEFAULT_GAME_PORT
}

#[derive(Serialize, Deserialize)]
pub struct HostAddRequest {
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Serialize, Deserialize)]
pub struct HostAddResponse {
    pub created: bool,
}

#[derive(Serialize, Deserialize)]
pub struct HostRemoveRequest {
    pub name: String,
}

#[derive(Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerDetail>,
}

#[derive(Serialize, Deserialize)]
pub struct PeerEditRequest {
    pub addr: String,
}

#[derive(Serialize, Deserialize)]
pub struct PeerEditResponse {
    pub changed: bool,
}

#[derive(Serialize, Deserialize, Default)]
pub struct FailoverQuery {
    #[serde(default)]
    pub exclude: String,
}

#[derive(Serialize, Deserialize)]
pub struct FailoverAnswer {
    pub candidate: Option<HostEndpoint>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }

    let (online, offline) = state.registry.status_counts();
    let peers = if let Some(f) = &state.peer_list_fn {
        f().await
    } else {
        vec![]
    };

    Json(StatusResponse {
        node_name: state.node_name.clone(),
        mode: state.mode.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        hosts_online: online,
        hosts_offline: offline,
        peers_configured: peers.len(),
        peers_connected: peers.iter().filter(|p| p.connected).count(),
    })
    .into_response()
}

async fn hosts_list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    Json(HostsResponse {
        hosts: state.registry.list_all(),
    })
    .into_response()
}

async fn hosts_add(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<HostAddRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    if req.name.trim().is_empty() || req.address.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "name and address are required").into_response();
    }

    let outcome = state
        .registry
        .register(&req.name, &req.address, req.port, chrono::Utc::now());
    tracing::info!(host = %req.name, "api: host added manually");
    Json(HostAddResponse {
        created: outcome == UpsertOutcome::Created,
    })
    .into_response()
}

async fn hosts_remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<HostRemoveRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    if !state.registry.remove(&req.name) {
        return (StatusCode::NOT_FOUND, "host not found").into_response();
    }
    Json(serde_json::json!({ "removed": true })).into_response()
}

async fn peers_list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    let peers = if let Some(f) = &state.peer_list_fn {
        f().await
    } else {
        vec![]
    };
    Json(PeersResponse { peers }).into_response()
}

async fn peers_add(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PeerEditRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    let Some(f) = &state.peer_add_fn else {
        return (StatusCode::SERVICE_UNAVAILABLE, "gossip disabled in central mode")
            .into_response();
    };
    if req.addr.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "addr is required").into_response();
    }
    let changed = f(req.addr.trim().to_string()).await;
    Json(PeerEditResponse { changed }).into_response()
}

async fn peers_remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PeerEditRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    let Some(f) = &state.peer_remove_fn else {
        return (StatusCode::SERVICE_UNAVAILABLE, "gossip disabled in central mode")
            .into_response();
    };
    let changed = f(req.addr.trim().to_string()).await;
    Json(PeerEditResponse { changed }).into_response()
}

async fn failover(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<FailoverQuery>,
) -> impl IntoResponse {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    let candidate = state
        .registry
        .select_failover_candidate(&req.exclude)
        .map(|h| h.endpoint());
    Json(FailoverAnswer { candidate }).into_response()
}
