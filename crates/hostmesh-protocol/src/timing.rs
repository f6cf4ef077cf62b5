//! Protocol timing -- the parameter set every registry and host agrees on.
//!
//! Intervals are node-local in principle, but a host's heartbeat interval
//! must stay well under the registry's host timeout or healthy hosts flap
//! offline. Keeping them in one table makes that relation checkable.

/// Timing and size parameters for the host registry protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    // -- Liveness --
    /// Seconds between heartbeat monitor sweeps.
    pub monitor_interval_secs: u64,
    /// Seconds of silence before an online host is demoted to offline.
    pub host_timeout_secs: u64,
    /// Seconds between heartbeats sent by a host client.
    pub heartbeat_interval_secs: u64,

    // -- Gossip --
    /// Seconds between connector passes over configured peers.
    pub peer_connect_interval_secs: u64,
    /// Seconds between full-snapshot pushes to live peer sessions.
    pub peer_broadcast_interval_secs: u64,
    /// Outbound peer connect timeout in seconds.
    pub peer_connect_timeout_secs: u64,

    // -- Transport --
    /// Maximum frame payload in bytes.
    pub max_message_bytes: usize,
}

/// Reference timing for a small friend-hosted group.
///
/// A host misses three heartbeats before the monitor notices; the monitor
/// sweeps often enough that demotion lags the timeout by at most one tick.
pub const DEFAULT_TIMING: ProtocolTiming = ProtocolTiming {
    // Liveness
    monitor_interval_secs: 10,
    host_timeout_secs: 90,
    heartbeat_interval_secs: 30,

    // Gossip
    peer_connect_interval_secs: 60,
    peer_broadcast_interval_secs: 30,
    peer_connect_timeout_secs: 5,

    // Transport
    max_message_bytes: 16 * 1024 * 1024,
};
