//! Message dispatch -- maps one inbound request to at most one response.
//!
//! Shared by the listener (every inbound connection) and the gossip session
//! readers. Logical failures become `error` or `success: false` responses
//! where the exchange expects an answer; nothing here can end a connection.

use std::sync::Arc;

use chrono::Utc;
use hostmesh_client::ServerSupervisor;
use hostmesh_protocol::{
    Ack, CommandResponse, FailoverResponse, HostSnapshot, Message, PlayerEvent, Register,
    RegisterResponse,
};
use hostmesh_registry::HostRegistry;

#[derive(Clone)]
pub struct Dispatcher {
    registry: HostRegistry,
    supervisor: Option<Arc<dyn ServerSupervisor>>,
}

impl Dispatcher {
    pub fn new(registry: HostRegistry) -> Self {
        Self {
            registry,
            supervisor: None,
        }
    }

    /// Forward `server_command` to a local game-server console.
    pub fn with_supervisor(mut self, supervisor: Arc<dyn ServerSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// Handle one decoded message. `None` means nothing is written back.
    pub fn dispatch(&self, message: Message) -> Option<Message> {
        match message {
            Message::Register(req) => Some(self.on_register(req)),
            Message::Heartbeat(hb) => {
                if !self.registry.heartbeat(&hb.name, Utc::now()) {
                    tracing::debug!(host = %hb.name, "dispatch: heartbeat from unknown host");
                }
                Some(Message::HeartbeatResponse(Ack::OK))
            }
            Message::StatusUpdate(update) => {
                if !self.registry.apply_status(&update, Utc::now()) {
                    tracing::debug!(host = %update.name, "dispatch: status from unknown host");
                }
                Some(Message::StatusUpdateResponse(Ack::OK))
            }
            Message::PlayerJoin(ev) => {
                if player_event_is_complete(&ev) {
                    self.registry.add_player(&ev.name, &ev.player_name);
                }
                Some(Message::PlayerJoinResponse(Ack::OK))
            }
            Message::PlayerLeave(ev) => {
                if player_event_is_complete(&ev) {
                    self.registry.remove_player(&ev.name, &ev.player_name);
                }
                Some(Message::PlayerLeaveResponse(Ack::OK))
            }
            Message::ServerCommand(cmd) => Some(self.on_server_command(&cmd.command)),
            Message::FailoverRequest(req) => {
                tracing::info!(host = %req.name, "dispatch: failover requested");
                let response = match self.registry.select_failover_candidate(&req.name) {
                    Some(candidate) => {
                        tracing::info!(
                            host = %req.name,
                            candidate = %candidate.name,
                            "dispatch: failover candidate selected"
                        );
                        FailoverResponse {
                            success: true,
                            candidate: Some(candidate.endpoint()),
                            message: None,
                        }
                    }
                    None => FailoverResponse {
                        success: false,
                        candidate: None,
                        message: Some("no available hosts for failover".into()),
                    },
                };
                Some(Message::FailoverResponse(response))
            }
            Message::PeerDiscovery(snapshot) => {
                self.merge_snapshot("peer_discovery", snapshot);
                Some(Message::PeerDiscoveryResponse(Ack::OK))
            }
            Message::PeerSync(snapshot) => {
                self.merge_snapshot("peer_sync", snapshot);
                Some(Message::PeerSyncResponse(Ack::OK))
            }
            Message::Unknown => {
                tracing::warn!("dispatch: unknown message type, ignoring");
                None
            }
            // Responses and errors are only meaningful to the side that sent
            // the request.
            other => {
                tracing::debug!(
                    kind = other.type_name(),
                    "dispatch: unsolicited response dropped"
                );
                None
            }
        }
    }

    fn on_register(&self, req: Register) -> Message {
        if req.name.trim().is_empty() || req.address.trim().is_empty() {
            tracing::warn!("dispatch: register without name or address");
            return Message::error("missing host information");
        }
        self.registry
            .register(&req.name, &req.address, req.port, Utc::now());
        Message::RegisterResponse(RegisterResponse {
            success: true,
            message: "host registered".into(),
        })
    }

    fn on_server_command(&self, command: &str) -> Message {
        if command.trim().is_empty() {
            return Message::error("no command specified");
        }
        let Some(supervisor) = &self.supervisor else {
            tracing::info!(command, "dispatch: server command received, no server attached");
            return Message::CommandResponse(CommandResponse {
                success: true,
                message: None,
            });
        };
        match supervisor.send_command(command) {
            Ok(()) => {
                tracing::info!(command, "dispatch: server command forwarded");
                Message::CommandResponse(CommandResponse {
                    success: true,
                    message: None,
                })
            }
            Err(e) => {
                tracing::warn!(command, "dispatch: server command failed: {e}");
                Message::error(e.to_string())
            }
        }
    }

    fn merge_snapshot(&self, kind: &'static str, snapshot: HostSnapshot) {
        let offered = snapshot.hosts.len();
        let added = self.registry.merge_remote(snapshot.hosts);
        for name in &added {
            tracing::info!(host = %name, kind, "dispatch: host learned from peer");
        }
        tracing::debug!(kind, offered, added = added.len(), "dispatch: peer snapshot merged");
    }
}

fn player_event_is_complete(ev: &PlayerEvent) -> bool {
    !ev.name.is_empty() && !ev.player_name.is_empty()
}
