//! Wire message types for the host registry protocol.
//!
//! One closed enum, internally tagged by `type`. Request fields default when
//! absent so that a missing field reaches the handler as a logical error
//! instead of killing the connection as a parse error.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{HostName, DEFAULT_GAME_PORT};

// ============================================================================
// Host records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Online,
    Offline,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, HostStatus::Online)
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One known machine in the hosting group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: HostName,
    /// Game-server address, not the registry listener.
    pub address: String,
    pub port: u16,
    pub status: HostStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub players: BTreeSet<String>,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub cpu_usage: f64,
}

impl HostRecord {
    /// A freshly registered host: online, seen at `now`, no players, no load.
    pub fn new(
        name: impl Into<HostName>,
        address: impl Into<String>,
        port: u16,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            status: HostStatus::Online,
            last_seen: now,
            players: BTreeSet::new(),
            memory_usage: 0.0,
            cpu_usage: 0.0,
        }
    }

    pub fn endpoint(&self) -> HostEndpoint {
        HostEndpoint {
            name: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
        }
    }
}

/// Where to reach a host's game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEndpoint {
    pub name: HostName,
    pub address: String,
    pub port: u16,
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Register(Register),
    RegisterResponse(RegisterResponse),
    Heartbeat(Heartbeat),
    HeartbeatResponse(Ack),
    StatusUpdate(StatusUpdate),
    StatusUpdateResponse(Ack),
    PlayerJoin(PlayerEvent),
    PlayerJoinResponse(Ack),
    PlayerLeave(PlayerEvent),
    PlayerLeaveResponse(Ack),
    ServerCommand(ServerCommand),
    CommandResponse(CommandResponse),
    FailoverRequest(FailoverRequest),
    FailoverResponse(FailoverResponse),
    PeerDiscovery(HostSnapshot),
    PeerDiscoveryResponse(Ack),
    PeerSync(HostSnapshot),
    PeerSyncResponse(Ack),
    Error(ErrorMessage),
    /// Any tag this build does not know. Never sent, only decoded.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// The wire tag, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Register(_) => "register",
            Message::RegisterResponse(_) => "register_response",
            Message::Heartbeat(_) => "heartbeat",
            Message::HeartbeatResponse(_) => "heartbeat_response",
            Message::StatusUpdate(_) => "status_update",
            Message::StatusUpdateResponse(_) => "status_update_response",
            Message::PlayerJoin(_) => "player_join",
            Message::PlayerJoinResponse(_) => "player_join_response",
            Message::PlayerLeave(_) => "player_leave",
            Message::PlayerLeaveResponse(_) => "player_leave_response",
            Message::ServerCommand(_) => "server_command",
            Message::CommandResponse(_) => "command_response",
            Message::FailoverRequest(_) => "failover_request",
            Message::FailoverResponse(_) => "failover_response",
            Message::PeerDiscovery(_) => "peer_discovery",
            Message::PeerDiscoveryResponse(_) => "peer_discovery_response",
            Message::PeerSync(_) => "peer_sync",
            Message::PeerSyncResponse(_) => "peer_sync_response",
            Message::Error(_) => "error",
            Message::Unknown => "unknown",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

// ============================================================================
// Requests
// ============================================================================

fn default_game_port() -> u16 {
    DEFAULT_GAME_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    #[serde(default)]
    pub name: HostName,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_game_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub name: HostName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub name: HostName,
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub status: HostStatus,
}

/// Body of both `player_join` and `player_leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEvent {
    #[serde(default)]
    pub name: HostName,
    #[serde(default)]
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCommand {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverRequest {
    /// The requester, excluded from candidates.
    #[serde(default)]
    pub name: HostName,
}

/// Full registry snapshot carried by `peer_discovery` and `peer_sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub const OK: Ack = Ack { success: true };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<HostEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}
