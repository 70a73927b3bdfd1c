//! Work items on the dispatcher's ingress queue.

use crate::{EventId, LinkName, PeerMessage, PublishTicket, StateChange, TimerId};
use std::fmt;

/// The normalised event stream a transport adapter delivers for its link.
///
/// Adapters translate whatever their underlying pub/sub client produces into
/// this sequence. Adapters never retry connects themselves; after
/// `ConnectFailed` or `Disconnected` the adapter goes quiet until the link
/// state machine commands another connect.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The broker connection is established.
    Connected,
    /// A connect attempt failed before the connection was established.
    ConnectFailed { reason: String },
    /// An established connection was lost.
    Disconnected { reason: String },
    /// The broker acknowledged a subscription to `topic`.
    SubAck { topic: String },
    /// An inbound message arrived. Not yet validated — the dispatcher runs it
    /// through the application message parser before it counts as peer
    /// traffic.
    Message { topic: String, payload: Vec<u8> },
    /// The broker acknowledged the publication correlated by `ticket`.
    PubAck { ticket: PublishTicket },
}

impl TransportEvent {
    /// Event type name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Connected => "Connected",
            TransportEvent::ConnectFailed { .. } => "ConnectFailed",
            TransportEvent::Disconnected { .. } => "Disconnected",
            TransportEvent::SubAck { .. } => "SubAck",
            TransportEvent::Message { .. } => "Message",
            TransportEvent::PubAck { .. } => "PubAck",
        }
    }
}

/// State-change subscriber callback.
///
/// Invoked synchronously on the dispatcher thread, in registration order.
/// Callbacks must not block and must not re-enter the façade other than
/// through its thread-safe enqueue.
pub type StateChangeFn = Box<dyn Fn(&StateChange) + Send>;

/// Validated peer message subscriber callback.
///
/// Invoked synchronously on the dispatcher thread for every inbound message
/// the application parser accepted.
pub type PeerMessageFn = Box<dyn Fn(&LinkName, &PeerMessage) + Send>;

/// All possible work items the dispatcher can receive.
///
/// Processed strictly in arrival order; each item is handled to completion
/// before the next is taken.
pub enum Event {
    /// A transport adapter event for one link.
    Transport {
        link: LinkName,
        event: TransportEvent,
    },
    /// A previously set timer fired.
    Timer(TimerId),
    /// The application journaled a new outbound event for `link`.
    EventJournaled { link: LinkName, event_id: EventId },
    /// Register a state-change subscriber.
    SubscribeStateChanges(StateChangeFn),
    /// Drain and exit: stop all links, cancel timers, leave the loop.
    Shutdown,
}

impl Event {
    /// Event type name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Transport { event, .. } => event.kind(),
            Event::Timer(_) => "Timer",
            Event::EventJournaled { .. } => "EventJournaled",
            Event::SubscribeStateChanges(_) => "SubscribeStateChanges",
            Event::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Transport { link, event } => f
                .debug_struct("Transport")
                .field("link", link)
                .field("event", event)
                .finish(),
            Event::Timer(id) => f.debug_tuple("Timer").field(id).finish(),
            Event::EventJournaled { link, event_id } => f
                .debug_struct("EventJournaled")
                .field("link", link)
                .field("event_id", event_id)
                .finish(),
            Event::SubscribeStateChanges(_) => f.write_str("SubscribeStateChanges(..)"),
            Event::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Thread-safe handle for enqueueing work onto the dispatcher.
///
/// Cloned into transport adapters, timer tasks, and the public façade; this
/// is the only way anything outside the dispatcher thread touches the core.
/// Sends after shutdown are silently dropped.
#[derive(Clone)]
pub struct EventSender(crossbeam::channel::Sender<Event>);

impl EventSender {
    pub fn new(tx: crossbeam::channel::Sender<Event>) -> Self {
        Self(tx)
    }

    pub fn send(&self, event: Event) {
        let _ = self.0.send(event);
    }
}
