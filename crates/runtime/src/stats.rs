//! Per-link observability snapshots.

use gridlink_core::LinkStateName;
use serde::Serialize;
use std::time::Duration;

/// Snapshot of one link's communication health.
///
/// Published by the dispatcher after every step into a shared read model, so
/// façade queries never touch dispatcher state. Ack starvation shows up here
/// (state + `ack_timeouts`) rather than as an error anywhere.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    pub state: LinkStateName,
    /// Publications currently awaiting their broker ack.
    pub in_flight: usize,
    /// Journaled events not yet acked by the peer.
    pub unacked_backlog: usize,
    /// When a valid peer message was last seen (duration since the UNIX
    /// epoch under the production clock).
    pub last_peer_seen: Option<Duration>,
    pub messages_received: u64,
    pub events_sent: u64,
    pub ack_timeouts: u64,
    pub connects: u64,
    pub disconnects: u64,
}

impl Default for LinkStats {
    fn default() -> Self {
        Self {
            state: LinkStateName::NotStarted,
            in_flight: 0,
            unacked_backlog: 0,
            last_peer_seen: None,
            messages_received: 0,
            events_sent: 0,
            ack_timeouts: 0,
            connects: 0,
            disconnects: 0,
        }
    }
}
