//! Pub/sub transport seam.
//!
//! Defines the [`Transport`] interface the dispatcher drives, implemented by
//! the production MQTT adapter (`gridlink-transport-mqtt`) and by
//! [`MemoryTransport`] for tests and simulation.
//!
//! Adapters normalise whatever their underlying client produces into the
//! ordered [`TransportEvent`](gridlink_core::TransportEvent) sequence,
//! delivered into the dispatcher's ingress queue via the [`EventSender`]
//! handed over at construction. Commands are fire-and-forget and must not
//! block: outcomes arrive later as events.

mod memory;

pub use memory::{MemoryTransport, MemoryTransportDriver, TransportOp};

use gridlink_core::{EventSender, LinkName, PublishTicket};

/// One link's connection to a pub/sub broker.
///
/// All methods are non-blocking and callable from the dispatcher thread.
/// Publish quality of service is at-least-once, so the broker produces an
/// acknowledgement for every publication.
pub trait Transport: Send {
    /// Begin a connect attempt. The outcome arrives as `Connected` or
    /// `ConnectFailed`. Adapters never retry on their own — the link state
    /// machine owns reconnection policy.
    fn connect(&self);

    /// Tear the connection down.
    fn disconnect(&self);

    /// Subscribe to a topic. Acknowledged later by `SubAck`.
    fn subscribe(&self, topic: &str);

    /// Publish at-least-once. The returned ticket correlates the later
    /// `PubAck`.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> PublishTicket;
}

/// Everything an adapter needs at construction time.
pub struct TransportContext {
    /// The link this adapter serves; stamped on every event it emits.
    pub link: LinkName,
    /// Ingress queue of the dispatcher.
    pub events: EventSender,
    /// Runtime for adapters that need background tasks.
    pub runtime: tokio::runtime::Handle,
}

/// Builds one link's transport when the runtime starts.
pub type TransportFactory = Box<dyn FnOnce(TransportContext) -> Box<dyn Transport> + Send>;
