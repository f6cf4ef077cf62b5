//! Peer gossip -- keeps registries in a peer group loosely in sync.
//!
//! Two loops, both only started in peer mode:
//!   1. Connector: every tick, dial each configured peer without a live
//!      session, open with a `peer_discovery` snapshot, and spawn a reader
//!      for that session. Failures are logged and retried next tick.
//!   2. Broadcaster: every tick, push a `peer_sync` snapshot to every live
//!      session. A failed write drops the session so the connector redials.
//!
//! Every session write has a deadline, so a peer that accepts but never
//! reads costs one timeout and not the whole loop. A tick's work is raced
//! against shutdown.
//!
//! Snapshots are folded insert-if-absent on the receiving side; nothing a
//! peer says overrides what this node already knows about a host.

use std::sync::Arc;
use std::time::Duration;

use hostmesh_protocol::{read_message, write_message, HostSnapshot, Message};
use hostmesh_registry::HostRegistry;
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::MissedTickBehavior;

use crate::dispatcher::Dispatcher;
use crate::peer_sessions::PeerSessions;

fn snapshot(registry: &HostRegistry) -> HostSnapshot {
    HostSnapshot {
        hosts: registry.list_all(),
    }
}

/// Write one frame, giving up after `deadline`.
async fn write_with_deadline<W>(
    writer: &mut W,
    message: &Message,
    deadline: Duration,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(deadline, write_message(writer, message))
        .await
        .map_err(|_| anyhow::anyhow!("write timed out after {deadline:?}"))??;
    Ok(())
}

/// Run the connector loop until shutdown. Closes every session on exit.
pub async fn run_connector_loop(
    dispatcher: Dispatcher,
    sessions: PeerSessions,
    interval: Duration,
    connect_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let configured = sessions.configured().await;
    if configured.is_empty() {
        tracing::info!("gossip: no peers configured -- waiting for peers to be added");
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let round = async {
                    for addr in sessions.needs_connect().await {
                        if let Err(e) = connect_peer(&dispatcher, &sessions, &addr, connect_timeout).await {
                            tracing::warn!(peer = %addr, "gossip: connect failed: {e}");
                        }
                    }
                };
                tokio::select! {
                    _ = round => {}
                    _ = shutdown.recv() => break,
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::info!("gossip: connector shutting down");
    sessions.close_all().await;
}

/// Dial one peer, introduce ourselves with a full snapshot, and register
/// the session. `connect_timeout` bounds the dial and the opening write
/// separately.
pub async fn connect_peer(
    dispatcher: &Dispatcher,
    sessions: &PeerSessions,
    addr: &str,
    connect_timeout: Duration,
) -> anyhow::Result<()> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {connect_timeout:?}"))??;
    let (read_half, mut write_half) = stream.into_split();

    let hello = Message::PeerDiscovery(snapshot(dispatcher.registry()));
    write_with_deadline(&mut write_half, &hello, connect_timeout).await?;

    // The reader waits until the session is stored, so a peer that hangs up
    // at once is removed after it was inserted, not before.
    let (stored_tx, stored_rx) = oneshot::channel();
    let id = sessions.next_session_id();
    let reader = tokio::spawn(run_session_reader(
        read_half,
        addr.to_string(),
        id,
        sessions.clone(),
        dispatcher.clone(),
        stored_rx,
    ));
    let writer = Arc::new(Mutex::new(write_half));
    if !sessions.insert(addr, id, writer, reader.abort_handle()).await {
        tracing::debug!(peer = addr, "gossip: peer removed while connecting");
    }
    let _ = stored_tx.send(());
    Ok(())
}

/// Read whatever the peer sends back on our outbound session. Acks are
/// expected; snapshots are folded in like inbound gossip.
async fn run_session_reader(
    mut reader: OwnedReadHalf,
    addr: String,
    id: u64,
    sessions: PeerSessions,
    dispatcher: Dispatcher,
    stored: oneshot::Receiver<()>,
) {
    if stored.await.is_err() {
        return;
    }
    loop {
        match read_message(&mut reader).await {
            Ok(message @ (Message::PeerDiscovery(_) | Message::PeerSync(_))) => {
                dispatcher.dispatch(message);
            }
            Ok(Message::Error(err)) => {
                tracing::warn!(peer = %addr, "gossip: peer reported error: {}", err.message);
            }
            Ok(other) => {
                tracing::trace!(peer = %addr, kind = other.type_name(), "gossip: peer reply");
            }
            Err(e) if e.is_connection_closed() => {
                tracing::debug!(peer = %addr, "gossip: peer closed session");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %addr, "gossip: bad frame from peer: {e}");
                break;
            }
        }
    }
    sessions.remove(&addr, id).await;
}

/// Run the broadcaster loop until shutdown.
pub async fn run_broadcaster_loop(
    registry: HostRegistry,
    sessions: PeerSessions,
    interval: Duration,
    write_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::select! {
                    _ = broadcast_once(&registry, &sessions, write_timeout) => {}
                    _ = shutdown.recv() => break,
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::info!("gossip: broadcaster shutting down");
}

/// Push one `peer_sync` snapshot to every live session. Returns how many
/// sessions accepted the write within `write_timeout`.
pub async fn broadcast_once(
    registry: &HostRegistry,
    sessions: &PeerSessions,
    write_timeout: Duration,
) -> usize {
    let live = sessions.live().await;
    if live.is_empty() {
        return 0;
    }

    let message = Message::PeerSync(snapshot(registry));
    let mut sent = 0;
    for session in live {
        let result = {
            let mut writer = session.writer.lock().await;
            write_with_deadline(&mut *writer, &message, write_timeout).await
        };
        match result {
            Ok(()) => sent += 1,
            Err(e) => {
                tracing::warn!(peer = %session.addr, "gossip: sync write failed, dropping session: {e}");
                sessions.remove(&session.addr, session.id).await;
            }
        }
    }
    tracing::debug!(sent, hosts = registry.len(), "gossip: sync broadcast");
    sent
}
