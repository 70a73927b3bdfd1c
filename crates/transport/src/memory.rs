//! In-memory transport for tests and simulation.
//!
//! [`MemoryTransport`] records every command it receives; the paired
//! [`MemoryTransportDriver`] plays the broker, injecting transport events
//! into the dispatcher's ingress queue at the test's discretion.

use crate::Transport;
use gridlink_core::{Event, EventSender, LinkName, PublishTicket, TransportEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A recorded transport command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Connect,
    Disconnect,
    Subscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        ticket: PublishTicket,
    },
}

#[derive(Debug, Default)]
struct Shared {
    ops: Vec<TransportOp>,
}

/// Recording [`Transport`] backed by shared memory.
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    next_ticket: Arc<AtomicU64>,
}

/// Test-side handle: inspect recorded commands, inject broker events.
pub struct MemoryTransportDriver {
    link: LinkName,
    events: EventSender,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// Create a transport/driver pair for `link`.
    pub fn pair(link: LinkName, events: EventSender) -> (MemoryTransport, MemoryTransportDriver) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            MemoryTransport {
                shared: Arc::clone(&shared),
                next_ticket: Arc::new(AtomicU64::new(1)),
            },
            MemoryTransportDriver {
                link,
                events,
                shared,
            },
        )
    }

    fn record(&self, op: TransportOp) {
        self.shared.lock().unwrap().ops.push(op);
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) {
        self.record(TransportOp::Connect);
    }

    fn disconnect(&self) {
        self.record(TransportOp::Disconnect);
    }

    fn subscribe(&self, topic: &str) {
        self.record(TransportOp::Subscribe(topic.to_owned()));
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> PublishTicket {
        let ticket = PublishTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        self.record(TransportOp::Publish {
            topic: topic.to_owned(),
            payload,
            ticket,
        });
        ticket
    }
}

impl MemoryTransportDriver {
    fn emit(&self, event: TransportEvent) {
        self.events.send(Event::Transport {
            link: self.link.clone(),
            event,
        });
    }

    pub fn connected(&self) {
        self.emit(TransportEvent::Connected);
    }

    pub fn connect_failed(&self, reason: &str) {
        self.emit(TransportEvent::ConnectFailed {
            reason: reason.to_owned(),
        });
    }

    pub fn disconnected(&self, reason: &str) {
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_owned(),
        });
    }

    pub fn suback(&self, topic: &str) {
        self.emit(TransportEvent::SubAck {
            topic: topic.to_owned(),
        });
    }

    pub fn message(&self, topic: &str, payload: &[u8]) {
        self.emit(TransportEvent::Message {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        });
    }

    pub fn puback(&self, ticket: PublishTicket) {
        self.emit(TransportEvent::PubAck { ticket });
    }

    /// Commands recorded since the last call, in order.
    pub fn take_ops(&self) -> Vec<TransportOp> {
        std::mem::take(&mut self.shared.lock().unwrap().ops)
    }

    /// Publishes recorded since the last `take_ops`, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>, PublishTicket)> {
        self.shared
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter_map(|op| match op {
                TransportOp::Publish {
                    topic,
                    payload,
                    ticket,
                } => Some((topic.clone(), payload.clone(), *ticket)),
                _ => None,
            })
            .collect()
    }
}
