//! Host client -- one TCP connection to a registry, request/response.
//!
//! State machine:
//!   disconnected --connect ok--> connected + heartbeating
//!   connected --send failure | disconnect()--> disconnected
//!
//! No automatic reconnect. Every call writes one request and waits for the
//! matching response on the same connection; the connection mutex keeps the
//! heartbeat loop from interleaving with user calls. A call dropped before
//! its response arrives leaves the stream out of step, so the session is
//! marked disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostmesh_protocol::messages::*;
use hostmesh_protocol::{
    read_message, write_message, HostName, ProtocolError, DEFAULT_TIMING,
    HEARTBEAT_INTERVAL_SECS,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::supervisor::ServerSupervisor;
use crate::ClientError;

/// How this host introduces itself to a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    pub name: HostName,
    /// Address players use to reach this host's game server.
    pub address: String,
    pub port: u16,
}

/// Fields of a `status_update`; the host name is filled in by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFields {
    pub players: Vec<String>,
    pub memory_usage: f64,
    pub cpu_usage: f64,
    pub status: HostStatus,
}

/// Outcome of [`HostClient::check_server`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCheck {
    Running,
    Stopped,
    /// The server stopped unexpectedly and failover was requested.
    FailedOver(Option<HostEndpoint>),
}

struct Connection {
    stream: TcpStream,
}

impl Connection {
    async fn request(&mut self, message: &Message) -> Result<Message, ProtocolError> {
        write_message(&mut self.stream, message).await?;
        read_message(&mut self.stream).await
    }
}

struct Session {
    descriptor: HostDescriptor,
    conn: Arc<Mutex<Connection>>,
    alive: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    heartbeat: JoinHandle<()>,
}

pub struct HostClient {
    registry_addr: String,
    heartbeat_interval: Duration,
    connect_timeout: Duration,
    session: Option<Session>,
}

impl HostClient {
    pub fn new(registry_addr: impl Into<String>) -> Self {
        Self {
            registry_addr: registry_addr.into(),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_TIMING.peer_connect_timeout_secs),
            session: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn registry_addr(&self) -> &str {
        &self.registry_addr
    }

    /// Whether a session is open and no send has failed on it.
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.alive.load(Ordering::Acquire))
    }

    /// Open a connection, register, and start heartbeating.
    pub async fn connect(&mut self, descriptor: HostDescriptor) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        // Reap a session that died on a send failure
        self.disconnect().await;

        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(&self.registry_addr),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout {
            addr: self.registry_addr.clone(),
        })??;
        stream.set_nodelay(true)?;
        let mut conn = Connection { stream };

        let register = Message::Register(Register {
            name: descriptor.name.clone(),
            address: descriptor.address.clone(),
            port: descriptor.port,
        });
        match conn.request(&register).await? {
            Message::RegisterResponse(resp) if resp.success => {
                tracing::info!(
                    registry = %self.registry_addr,
                    host = %descriptor.name,
                    "client: registered with registry"
                );
            }
            Message::RegisterResponse(resp) => return Err(ClientError::Rejected(resp.message)),
            Message::Error(e) => return Err(ClientError::Rejected(e.message)),
            _ => return Err(ClientError::UnexpectedResponse("register")),
        }

        let conn = Arc::new(Mutex::new(conn));
        let alive = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let heartbeat = tokio::spawn(run_heartbeat_loop(
            descriptor.name.clone(),
            conn.clone(),
            alive.clone(),
            self.heartbeat_interval,
            shutdown_rx,
        ));

        self.session = Some(Session {
            descriptor,
            conn,
            alive,
            shutdown_tx,
            heartbeat,
        });
        Ok(())
    }

    /// Stop heartbeating and close the connection. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let _ = session.shutdown_tx.send(());
        session.heartbeat.abort();
        session.alive.store(false, Ordering::Release);
        let mut conn = session.conn.lock().await;
        let _ = conn.stream.shutdown().await;
        tracing::info!(host = %session.descriptor.name, "client: disconnected from registry");
    }

    pub async fn update_status(&self, fields: StatusFields) -> Result<(), ClientError> {
        let name = self.host_name()?;
        let msg = Message::StatusUpdate(StatusUpdate {
            name,
            players: fields.players,
            memory_usage: fields.memory_usage,
            cpu_usage: fields.cpu_usage,
            status: fields.status,
        });
        match self.request(msg).await? {
            Message::StatusUpdateResponse(_) => Ok(()),
            other => Err(unexpected(other, "status_update")),
        }
    }

    pub async fn notify_player_join(&self, player: &str) -> Result<(), ClientError> {
        let msg = Message::PlayerJoin(PlayerEvent {
            name: self.host_name()?,
            player_name: player.to_string(),
        });
        match self.request(msg).await? {
            Message::PlayerJoinResponse(_) => Ok(()),
            other => Err(unexpected(other, "player_join")),
        }
    }

    pub async fn notify_player_leave(&self, player: &str) -> Result<(), ClientError> {
        let msg = Message::PlayerLeave(PlayerEvent {
            name: self.host_name()?,
            player_name: player.to_string(),
        });
        match self.request(msg).await? {
            Message::PlayerLeaveResponse(_) => Ok(()),
            other => Err(unexpected(other, "player_leave")),
        }
    }

    /// Ask the registry for another online host. `None` when there is none.
    pub async fn request_failover(&self) -> Result<Option<HostEndpoint>, ClientError> {
        let msg = Message::FailoverRequest(FailoverRequest {
            name: self.host_name()?,
        });
        match self.request(msg).await? {
            Message::FailoverResponse(resp) if resp.success => Ok(resp.candidate),
            Message::FailoverResponse(resp) => {
                tracing::warn!(
                    reason = resp.message.as_deref().unwrap_or(""),
                    "client: no failover candidate"
                );
                Ok(None)
            }
            other => Err(unexpected(other, "failover_request")),
        }
    }

    /// Publish the supervisor's view of the game server as a `status_update`.
    pub async fn report_server_status(
        &self,
        supervisor: &dyn ServerSupervisor,
    ) -> Result<crate::ServerStatus, ClientError> {
        let status = supervisor.status();
        self.update_status(StatusFields {
            players: status.players.clone(),
            memory_usage: status.memory_usage,
            cpu_usage: status.cpu_usage,
            status: if status.running {
                HostStatus::Online
            } else {
                HostStatus::Offline
            },
        })
        .await?;
        Ok(status)
    }

    /// Report status and, if the server was running last time and is not
    /// now, request failover.
    pub async fn check_server(
        &self,
        supervisor: &dyn ServerSupervisor,
        was_running: bool,
    ) -> Result<ServerCheck, ClientError> {
        let status = self.report_server_status(supervisor).await?;
        if status.running {
            return Ok(ServerCheck::Running);
        }
        if !was_running {
            return Ok(ServerCheck::Stopped);
        }
        tracing::warn!("client: game server stopped unexpectedly, requesting failover");
        let candidate = self.request_failover().await?;
        if let Some(c) = &candidate {
            tracing::info!(candidate = %c.name, address = %c.address, port = c.port, "client: failover candidate");
        }
        Ok(ServerCheck::FailedOver(candidate))
    }

    fn live_session(&self) -> Result<&Session, ClientError> {
        match &self.session {
            Some(s) if s.alive.load(Ordering::Acquire) => Ok(s),
            _ => Err(ClientError::NotConnected),
        }
    }

    fn host_name(&self) -> Result<HostName, ClientError> {
        Ok(self.live_session()?.descriptor.name.clone())
    }

    async fn request(&self, message: Message) -> Result<Message, ClientError> {
        let session = self.live_session()?;
        let result = {
            let mut conn = session.conn.lock().await;
            let in_flight = InFlight::new(&session.alive);
            let result = conn.request(&message).await;
            in_flight.finish();
            result
        };
        match result {
            Ok(Message::Error(e)) => Err(ClientError::Rejected(e.message)),
            Ok(resp) => Ok(resp),
            Err(e) => {
                tracing::warn!(
                    request = message.type_name(),
                    "client: send failed, marking disconnected: {e}"
                );
                session.alive.store(false, Ordering::Release);
                let _ = session.shutdown_tx.send(());
                Err(e.into())
            }
        }
    }
}

impl Drop for HostClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.heartbeat.abort();
        }
    }
}

/// Marks the session dead if a request is dropped between its write and
/// the matching read, so a late reply is never taken for the next one.
struct InFlight<'a> {
    alive: &'a AtomicBool,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn new(alive: &'a AtomicBool) -> Self {
        Self {
            alive,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("client: request cancelled mid-flight, marking disconnected");
            self.alive.store(false, Ordering::Release);
        }
    }
}

fn unexpected(got: Message, request: &'static str) -> ClientError {
    tracing::debug!(got = got.type_name(), request, "client: unexpected response");
    ClientError::UnexpectedResponse(request)
}

/// Heartbeat until shutdown or the first failed send.
async fn run_heartbeat_loop(
    name: HostName,
    conn: Arc<Mutex<Connection>>,
    alive: Arc<AtomicBool>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The register just proved liveness
    ticker.tick().await;

    let heartbeat = Message::Heartbeat(Heartbeat { name: name.clone() });
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !alive.load(Ordering::Acquire) {
                    return;
                }
                let result = conn.lock().await.request(&heartbeat).await;
                match result {
                    Ok(Message::HeartbeatResponse(ack)) => {
                        tracing::trace!(host = %name, success = ack.success, "client: heartbeat");
                    }
                    Ok(other) => {
                        tracing::debug!(host = %name, got = other.type_name(), "client: odd heartbeat reply");
                    }
                    Err(e) => {
                        tracing::warn!(host = %name, "client: heartbeat failed, disconnected: {e}");
                        alive.store(false, Ordering::Release);
                        return;
                    }
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}
