//! MQTT binding of the transport seam, built on `rumqttc`.
//!
//! One background task per link, fed by a command channel. The task owns the
//! MQTT client and its event loop for the duration of one connection
//! session; when the session ends (broker loss, connect failure, commanded
//! disconnect) the task goes quiet until the link state machine commands the
//! next connect — reconnection policy lives entirely in the state machine.
//!
//! # Packet-id correlation
//!
//! The client assigns packet ids only as requests reach the wire, so the
//! task keeps FIFO correlation queues: each subscribe request is queued and
//! married to its pkid when the outgoing packet is observed, letting a later
//! `SubAck` be re-expanded into per-topic events; publishes are correlated
//! the same way from [`PublishTicket`] to pkid to `PubAck`.
//!
//! TLS and credentials pass through opaquely inside [`rumqttc::MqttOptions`].

use gridlink_core::{Event, EventSender, LinkName, PublishTicket, TransportEvent};
use gridlink_transport::{Transport, TransportContext, TransportFactory};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event as MqttEvent, MqttOptions, Outgoing, Packet, QoS,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    /// Client options (broker address, credentials, TLS, keep-alive).
    pub options: MqttOptions,
    /// Request channel capacity of the underlying client.
    pub channel_capacity: usize,
}

impl MqttTransportConfig {
    pub fn new(options: MqttOptions) -> Self {
        Self {
            options,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Subscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        ticket: PublishTicket,
    },
}

/// [`Transport`] implementation forwarding commands to the adapter task.
pub struct MqttTransport {
    link: LinkName,
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_ticket: AtomicU64,
}

/// Spawn the adapter task for one link and return its command handle.
pub fn spawn(config: MqttTransportConfig, ctx: TransportContext) -> MqttTransport {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    ctx.runtime
        .spawn(run(ctx.link.clone(), ctx.events, config, cmd_rx));
    MqttTransport {
        link: ctx.link,
        cmd_tx,
        next_ticket: AtomicU64::new(1),
    }
}

/// Convenience [`TransportFactory`] for the runtime builder.
pub fn factory(config: MqttTransportConfig) -> TransportFactory {
    Box::new(move |ctx| {
        let transport: Box<dyn Transport> = Box::new(spawn(config, ctx));
        transport
    })
}

impl MqttTransport {
    fn send(&self, command: Command) {
        if self.cmd_tx.send(command).is_err() {
            warn!(link = %self.link, "mqtt adapter task is gone");
        }
    }
}

impl Transport for MqttTransport {
    fn connect(&self) {
        self.send(Command::Connect);
    }

    fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    fn subscribe(&self, topic: &str) {
        self.send(Command::Subscribe(topic.to_owned()));
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> PublishTicket {
        let ticket = PublishTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        self.send(Command::Publish {
            topic: topic.to_owned(),
            payload,
            ticket,
        });
        ticket
    }
}

fn emit(events: &EventSender, link: &LinkName, event: TransportEvent) {
    events.send(Event::Transport {
        link: link.clone(),
        event,
    });
}

async fn run(
    link: LinkName,
    events: EventSender,
    config: MqttTransportConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        // Quiet until the state machine commands a connect.
        let Some(command) = cmd_rx.recv().await else {
            return;
        };
        match command {
            Command::Connect => {}
            Command::Disconnect => continue,
            Command::Subscribe(topic) => {
                warn!(%link, topic, "subscribe while disconnected dropped");
                continue;
            }
            Command::Publish { ticket, .. } => {
                warn!(%link, %ticket, "publish while disconnected dropped");
                continue;
            }
        }
        if !session(&link, &events, &config, &mut cmd_rx).await {
            return;
        }
    }
}

/// Per-session correlation state.
#[derive(Default)]
struct Correlator {
    /// Subscribe requests awaiting their outgoing pkid, in request order.
    sub_requests: VecDeque<String>,
    /// Outgoing subscribe pkid → topics awaiting the SubAck.
    suback_topics: HashMap<u16, Vec<String>>,
    /// Publish tickets awaiting their outgoing pkid, in request order.
    pub_requests: VecDeque<PublishTicket>,
    /// Outgoing publish pkid → ticket awaiting the PubAck.
    puback_tickets: HashMap<u16, PublishTicket>,
}

/// Drive one connection session. Returns `false` when the command channel is
/// closed and the task should exit.
async fn session(
    link: &LinkName,
    events: &EventSender,
    config: &MqttTransportConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> bool {
    let (client, mut event_loop) = AsyncClient::new(config.options.clone(), config.channel_capacity);
    let mut correlator = Correlator::default();
    let mut connected = false;

    loop {
        tokio::select! {
            polled = event_loop.poll() => match polled {
                Ok(MqttEvent::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        debug!(%link, "mqtt connected");
                        connected = true;
                        emit(events, link, TransportEvent::Connected);
                    } else {
                        emit(events, link, TransportEvent::ConnectFailed {
                            reason: format!("broker refused connection: {:?}", ack.code),
                        });
                        return true;
                    }
                }
                Ok(MqttEvent::Incoming(Packet::SubAck(ack))) => {
                    for topic in correlator.suback_topics.remove(&ack.pkid).unwrap_or_default() {
                        trace!(%link, topic, pkid = ack.pkid, "suback");
                        emit(events, link, TransportEvent::SubAck { topic });
                    }
                }
                Ok(MqttEvent::Incoming(Packet::PubAck(ack))) => {
                    if let Some(ticket) = correlator.puback_tickets.remove(&ack.pkid) {
                        emit(events, link, TransportEvent::PubAck { ticket });
                    }
                }
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                    emit(events, link, TransportEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(MqttEvent::Outgoing(Outgoing::Subscribe(pkid))) => {
                    if let Some(topic) = correlator.sub_requests.pop_front() {
                        correlator.suback_topics.entry(pkid).or_default().push(topic);
                    }
                }
                Ok(MqttEvent::Outgoing(Outgoing::Publish(pkid))) => {
                    if let Some(ticket) = correlator.pub_requests.pop_front() {
                        correlator.puback_tickets.insert(pkid, ticket);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    if connected {
                        emit(events, link, TransportEvent::Disconnected {
                            reason: err.to_string(),
                        });
                    } else {
                        emit(events, link, TransportEvent::ConnectFailed {
                            reason: err.to_string(),
                        });
                    }
                    return true;
                }
            },
            command = cmd_rx.recv() => match command {
                None => {
                    let _ = client.disconnect().await;
                    return false;
                }
                Some(Command::Disconnect) => {
                    debug!(%link, "mqtt disconnect requested");
                    let _ = client.disconnect().await;
                    return true;
                }
                Some(Command::Connect) => {}
                Some(Command::Subscribe(topic)) => {
                    correlator.sub_requests.push_back(topic.clone());
                    if client.subscribe(topic, QoS::AtLeastOnce).await.is_err() {
                        correlator.sub_requests.pop_back();
                    }
                }
                Some(Command::Publish { topic, payload, ticket }) => {
                    correlator.pub_requests.push_back(ticket);
                    if client.publish(topic, QoS::AtLeastOnce, false, payload).await.is_err() {
                        correlator.pub_requests.pop_back();
                    }
                }
            }
        }
    }
}
