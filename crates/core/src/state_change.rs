//! Link communication-state notifications.

use crate::LinkName;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Communication states of a link.
///
/// Only [`Active`](LinkStateName::Active) is "active" in the application
/// sense: transport connected, all subscriptions acknowledged, peer recently
/// heard, outbound acks timely. Every other state is "not active".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStateName {
    NotStarted,
    Connecting,
    AwaitingSetupAndPeer,
    AwaitingSetup,
    AwaitingPeer,
    Active,
    Stopped,
}

impl LinkStateName {
    /// Whether communication is active in the application-level sense.
    pub fn is_active(&self) -> bool {
        matches!(self, LinkStateName::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStateName::NotStarted => "not_started",
            LinkStateName::Connecting => "connecting",
            LinkStateName::AwaitingSetupAndPeer => "awaiting_setup_and_peer",
            LinkStateName::AwaitingSetup => "awaiting_setup",
            LinkStateName::AwaitingPeer => "awaiting_peer",
            LinkStateName::Active => "active",
            LinkStateName::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LinkStateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a link changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeReason {
    Started,
    TransportConnectFailed,
    TransportConnected,
    AllSubsAcked,
    PeerMessage,
    AckTimeout,
    PeerSilence,
    TransportDisconnected,
    Stopped,
}

impl StateChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateChangeReason::Started => "started",
            StateChangeReason::TransportConnectFailed => "transport_connect_failed",
            StateChangeReason::TransportConnected => "transport_connected",
            StateChangeReason::AllSubsAcked => "all_subs_acked",
            StateChangeReason::PeerMessage => "peer_message",
            StateChangeReason::AckTimeout => "ack_timeout",
            StateChangeReason::PeerSilence => "peer_silence",
            StateChangeReason::TransportDisconnected => "transport_disconnected",
            StateChangeReason::Stopped => "stopped",
        }
    }
}

/// A link communication-state transition.
///
/// Delivered to subscribers in transition order, at least once, synchronously
/// on the dispatcher thread.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub link: LinkName,
    pub from: LinkStateName,
    pub to: LinkStateName,
    pub reason: StateChangeReason,
    /// Time of the transition, as a duration since the UNIX epoch under the
    /// production clock (logical time under test clocks).
    pub at: Duration,
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} ({})",
            self.link,
            self.from,
            self.to,
            self.reason.as_str()
        )
    }
}
