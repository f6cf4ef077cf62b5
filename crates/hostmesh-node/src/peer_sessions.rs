//! Peer sessions -- the configured peer list and the live outbound sessions.
//!
//! The connector reads the configured list each tick and dials whatever has
//! no live session. The broadcaster writes to every live session. Session
//! state sits behind its own lock, separate from the host registry, and the
//! lock is never held while a socket is written.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hostmesh_api::PeerDetail;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;

/// Shared write half of a live session's socket.
pub type SessionWriter = Arc<Mutex<OwnedWriteHalf>>;

/// One live outbound session.
#[derive(Debug)]
struct PeerSession {
    id: u64,
    connected_at: Instant,
    writer: SessionWriter,
    reader: AbortHandle,
}

/// Snapshot of a live session handed to the broadcaster.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub addr: String,
    pub id: u64,
    pub writer: SessionWriter,
}

#[derive(Default)]
struct Inner {
    configured: Vec<String>,
    live: HashMap<String, PeerSession>,
}

/// Thread-safe peer list plus session table. Cheap to clone.
#[derive(Clone)]
pub struct PeerSessions {
    inner: Arc<RwLock<Inner>>,
    next_id: Arc<AtomicU64>,
    default_port: u16,
}

impl PeerSessions {
    /// `default_port` is appended to configured peers given without one.
    pub fn new(configured: Vec<String>, default_port: u16) -> Self {
        let mut list: Vec<String> = Vec::new();
        for addr in configured {
            let addr = normalize_peer_addr(&addr, default_port);
            if !addr.is_empty() && !list.contains(&addr) {
                list.push(addr);
            }
        }
        Self {
            inner: Arc::new(RwLock::new(Inner {
                configured: list,
                live: HashMap::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            default_port,
        }
    }

    pub async fn configured(&self) -> Vec<String> {
        self.inner.read().await.configured.clone()
    }

    /// Add a peer address. Returns false if it was already configured.
    pub async fn add_peer(&self, addr: &str) -> bool {
        let addr = normalize_peer_addr(addr, self.default_port);
        if addr.is_empty() {
            return false;
        }
        let mut inner = self.inner.write().await;
        if inner.configured.contains(&addr) {
            return false;
        }
        inner.configured.push(addr.clone());
        tracing::info!(peer = %addr, configured = inner.configured.len(), "peers: peer added");
        true
    }

    /// Remove a peer address and drop its live session, if any.
    /// Returns false if it was not configured.
    pub async fn remove_peer(&self, addr: &str) -> bool {
        let addr = normalize_peer_addr(addr, self.default_port);
        let mut inner = self.inner.write().await;
        let before = inner.configured.len();
        inner.configured.retain(|a| a != &addr);
        if inner.configured.len() == before {
            return false;
        }
        if let Some(session) = inner.live.remove(&addr) {
            session.reader.abort();
        }
        tracing::info!(peer = %addr, configured = inner.configured.len(), "peers: peer removed");
        true
    }

    /// Configured peers with no live session.
    pub async fn needs_connect(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .configured
            .iter()
            .filter(|a| !inner.live.contains_key(*a))
            .cloned()
            .collect()
    }

    /// Reserve an id for a session about to be inserted.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Store a new live session. A session to an address that is no longer
    /// configured is refused and its reader aborted. Returns whether it was
    /// stored.
    pub async fn insert(
        &self,
        addr: &str,
        id: u64,
        writer: SessionWriter,
        reader: AbortHandle,
    ) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.configured.iter().any(|a| a == addr) {
            reader.abort();
            return false;
        }
        let session = PeerSession {
            id,
            connected_at: Instant::now(),
            writer,
            reader,
        };
        if let Some(old) = inner.live.insert(addr.to_string(), session) {
            old.reader.abort();
        }
        tracing::info!(peer = addr, session = id, live = inner.live.len(), "peers: session up");
        true
    }

    /// Drop the session for `addr` if it is still session `id`. A stale
    /// reader finishing late cannot tear down a newer session.
    pub async fn remove(&self, addr: &str, id: u64) -> bool {
        let mut inner = self.inner.write().await;
        if inner.live.get(addr).map(|s| s.id) != Some(id) {
            return false;
        }
        if let Some(session) = inner.live.remove(addr) {
            session.reader.abort();
        }
        tracing::info!(peer = addr, session = id, live = inner.live.len(), "peers: session dropped");
        true
    }

    pub async fn live(&self) -> Vec<LiveSession> {
        self.inner
            .read()
            .await
            .live
            .iter()
            .map(|(addr, s)| LiveSession {
                addr: addr.clone(),
                id: s.id,
                writer: s.writer.clone(),
            })
            .collect()
    }

    pub async fn live_count(&self) -> usize {
        self.inner.read().await.live.len()
    }

    /// Abort every session reader and forget all sessions.
    pub async fn close_all(&self) {
        let mut inner = self.inner.write().await;
        for (_, session) in inner.live.drain() {
            session.reader.abort();
        }
    }

    /// Configured peers and their session state for the API.
    pub async fn peer_details(&self) -> Vec<PeerDetail> {
        let inner = self.inner.read().await;
        inner
            .configured
            .iter()
            .map(|addr| {
                let session = inner.live.get(addr);
                PeerDetail {
                    addr: addr.clone(),
                    connected: session.is_some(),
                    connected_secs: session.map(|s| s.connected_at.elapsed().as_secs()),
                }
            })
            .collect()
    }
}

/// Canonical form of a peer address: trimmed, with `default_port` appended
/// when the entry names only a host.
pub fn normalize_peer_addr(addr: &str, default_port: u16) -> String {
    let addr = addr.trim();
    if addr.is_empty() {
        return String::new();
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => format!("{v4}:{default_port}"),
            IpAddr::V6(v6) => format!("[{v6}]:{default_port}"),
        };
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => addr.to_string(),
        _ => format!("{addr}:{default_port}"),
    }
}
