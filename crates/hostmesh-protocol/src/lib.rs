//! hostmesh protocol -- wire types, message codec, timing parameters.
//!
//! Plain TCP between hosts and registries. One message per frame:
//! 4-byte big-endian length prefix + serde JSON.

pub mod codec;
pub mod messages;
pub mod timing;

pub use codec::{decode_frame, encode_frame, read_message, write_message, MessageCodec};
pub use messages::*;
pub use timing::{ProtocolTiming, DEFAULT_TIMING};

/// Default TCP port of a registry listener.
pub const DEFAULT_REGISTRY_PORT: u16 = 25566;

/// Default game-server port assumed when a register omits it.
pub const DEFAULT_GAME_PORT: u16 = 25565;

/// Heartbeat monitor tick interval in seconds (sourced from default timing).
pub const MONITOR_INTERVAL_SECS: u64 = DEFAULT_TIMING.monitor_interval_secs;

/// Silence after which an online host is demoted (sourced from default timing).
pub const HOST_TIMEOUT_SECS: u64 = DEFAULT_TIMING.host_timeout_secs;

/// Host client heartbeat interval in seconds (sourced from default timing).
pub const HEARTBEAT_INTERVAL_SECS: u64 = DEFAULT_TIMING.heartbeat_interval_secs;

/// Maximum frame payload in bytes (sourced from default timing).
pub const MAX_MESSAGE_BYTES: usize = DEFAULT_TIMING.max_message_bytes;

/// Host identifier (unique name chosen by the owning machine).
pub type HostName = String;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
}

impl ProtocolError {
    /// Whether the peer went away (cleanly or mid-frame) rather than sent garbage.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed)
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(e),
        }
    }
}
