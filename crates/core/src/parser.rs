//! Application message parser seam.
//!
//! The core treats payloads as opaque bytes. The one thing it needs from the
//! application is a judgement: is this inbound message a well-formed
//! application message from the expected peer? Only accepted messages drive
//! the link state machine's `PeerMessage` input — malformed or unrelated
//! broker traffic never counts towards link health.

/// An inbound message that passed application-level validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Parser for one link's inbound traffic.
///
/// Production implementations decode the application's wire format; tests
/// typically accept everything.
pub trait PeerParser: Send {
    /// Validate an inbound message. `Some` when the payload is a well-formed
    /// application message from the expected peer, `None` otherwise.
    fn parse_peer_message(&self, topic: &str, payload: &[u8]) -> Option<PeerMessage>;

    /// Keepalive frame for this link's protocol, if it has one.
    ///
    /// Published periodically on the send path so a quiet peer still observes
    /// traffic. Pings are not journaled and not tracked for acknowledgement.
    fn ping_payload(&self) -> Option<Vec<u8>> {
        None
    }
}
