//! The game-server process supervisor, as seen by this crate.
//!
//! Starting, stopping and talking to the actual server binary lives outside
//! hostmesh. Hosts hand an implementation to the client so it can report
//! load and notice an unexpected stop; registries hand one to the node so
//! `server_command` messages reach a console.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStatus {
    pub running: bool,
    pub players: Vec<String>,
    pub memory_usage: f64,
    pub cpu_usage: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("server is not running")]
    NotRunning,
    #[error("server is already running")]
    AlreadyRunning,
    #[error("supervisor error: {0}")]
    Other(String),
}

pub trait ServerSupervisor: Send + Sync {
    fn start(&self) -> Result<(), SupervisorError>;
    fn stop(&self) -> Result<(), SupervisorError>;
    /// Write one line to the server console.
    fn send_command(&self, command: &str) -> Result<(), SupervisorError>;
    fn status(&self) -> ServerStatus;
}
