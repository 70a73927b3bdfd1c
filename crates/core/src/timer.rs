//! Timer identification.
//!
//! State machines request timers as actions; the runtime side converts them
//! into runtime-specific mechanisms:
//! - Production: the dispatcher's timer manager spawns tokio sleep tasks
//! - Tests: the harness fires due timers against a logical clock
//!
//! Timers are single-fire and cancellable; setting a timer with an id that is
//! already armed replaces the earlier one.

use crate::{EventId, LinkName};

/// Identification for scheduled timers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Reconnect backoff delay for a link.
    Reconnect(LinkName),
    /// Peer inactivity watchdog while a link is active.
    PeerSilence(LinkName),
    /// Keepalive poll cadence on a link's send path.
    Poll(LinkName),
    /// Acknowledgement deadline for one outstanding publication.
    Ack(EventId),
}
