//! hostmesh client -- the facade a hosting machine uses to join a registry.
//!
//! Registers, keeps itself alive with heartbeats, reports load and player
//! events, and asks the registry for a failover target when its own game
//! server dies.

pub mod client;
pub mod supervisor;

pub use client::{HostClient, HostDescriptor, ServerCheck, StatusFields};
pub use supervisor::{ServerStatus, ServerSupervisor, SupervisorError};

use hostmesh_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected to a registry")]
    NotConnected,
    #[error("already connected to a registry")]
    AlreadyConnected,
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("registry rejected request: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}
