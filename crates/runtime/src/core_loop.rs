//! Single-threaded cooperative dispatcher.
//!
//! `CoreLoop` owns all mutable core state and processes one ingress event at
//! a time to completion. Handlers never block: transport commands are
//! fire-and-forget, timer operations are buffered as [`TimerOp`]s for the
//! driving loop, and everything asynchronous re-enters as a later event.
//!
//! Internal cascades — a machine action feeding the ack engine, an ack
//! output feeding a machine event — drain within the same step through a
//! work queue, so state-change notifications are delivered strictly in
//! transition order before the next ingress event is taken.
//!
//! # Driving modes
//!
//! - **Production**: the façade's dispatcher thread blocks on the crossbeam
//!   ingress channel and applies timer ops to the tokio-backed
//!   [`TimerManager`](crate::TimerManager).
//! - **Tests**: the harness calls `set_time` + `step` directly and fires
//!   buffered timer ops against a logical clock.

use crate::stats::LinkStats;
use gridlink_core::{
    Event, LinkConfig, LinkName, PeerMessage, PeerMessageFn, PeerParser, StateChange,
    StateChangeFn, TimerId, TransportEvent,
};
use gridlink_journal::Journal;
use gridlink_links::{
    AckConfig, AckEngine, AckInput, AckOutput, LinkAction, LinkEvent, LinkMachine, LinkTimer,
};
use gridlink_transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// A timer operation buffered for the driving loop.
#[derive(Debug, Clone)]
pub enum TimerOp {
    /// Arm a single-fire timer (replaces an armed timer with the same id).
    Set { id: TimerId, duration: Duration },
    /// Cancel a previously armed timer.
    Cancel { id: TimerId },
}

/// Output of one [`CoreLoop::step`].
#[derive(Debug, Default)]
pub struct StepOutput {
    /// Timer operations to apply.
    pub timer_ops: Vec<TimerOp>,
    /// The loop processed `Shutdown` and should not be stepped again.
    pub shutdown: bool,
}

#[derive(Debug, Default)]
struct LinkCounters {
    messages_received: u64,
    events_sent: u64,
    ack_timeouts: u64,
    connects: u64,
    disconnects: u64,
}

struct LinkEntry {
    machine: LinkMachine,
    transport: Box<dyn Transport>,
    parser: Box<dyn PeerParser>,
    counters: LinkCounters,
}

/// Internal work items cascading within one step.
enum Work {
    Link(LinkName, LinkEvent),
    Ack(AckInput),
}

/// The dispatcher. Owns link machines, ack engine, and the journal handle;
/// mutual exclusion is by confinement to the driving thread.
pub struct CoreLoop {
    links: HashMap<LinkName, LinkEntry>,
    acks: AckEngine,
    journal: Arc<dyn Journal>,
    state_subscribers: Vec<StateChangeFn>,
    message_subscribers: Vec<PeerMessageFn>,
    snapshots: Arc<RwLock<HashMap<LinkName, LinkStats>>>,
    pending_timer_ops: Vec<TimerOp>,
    pending_deliveries: Vec<(LinkName, PeerMessage)>,
    now: Duration,
}

impl CoreLoop {
    pub fn new(journal: Arc<dyn Journal>, ack_config: AckConfig) -> Self {
        Self {
            links: HashMap::new(),
            acks: AckEngine::new(ack_config),
            journal,
            state_subscribers: Vec::new(),
            message_subscribers: Vec::new(),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            pending_timer_ops: Vec::new(),
            pending_deliveries: Vec::new(),
            now: Duration::ZERO,
        }
    }

    /// Register a link before the loop starts.
    pub fn add_link(
        &mut self,
        config: LinkConfig,
        transport: Box<dyn Transport>,
        parser: Box<dyn PeerParser>,
    ) {
        let name = config.name.clone();
        self.acks
            .set_link_ack_timeout(name.clone(), config.ack_timeout);
        self.snapshots
            .write()
            .unwrap()
            .insert(name.clone(), LinkStats::default());
        self.links.insert(
            name,
            LinkEntry {
                machine: LinkMachine::new(config),
                transport,
                parser,
                counters: LinkCounters::default(),
            },
        );
    }

    /// Register a state-change subscriber. Invoked synchronously on the
    /// dispatcher thread, in registration order.
    pub fn subscribe_state_changes(&mut self, cb: StateChangeFn) {
        self.state_subscribers.push(cb);
    }

    /// Register a subscriber for validated inbound peer messages.
    pub fn subscribe_peer_messages(&mut self, cb: PeerMessageFn) {
        self.message_subscribers.push(cb);
    }

    /// Shared read model for façade queries.
    pub fn snapshots(&self) -> Arc<RwLock<HashMap<LinkName, LinkStats>>> {
        Arc::clone(&self.snapshots)
    }

    /// Set the current time. Called before each `step()`.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Start every registered link.
    pub fn start_links(&mut self) -> StepOutput {
        info!(links = self.links.len(), "starting links");
        let mut work: VecDeque<Work> = self
            .links
            .keys()
            .cloned()
            .map(|name| Work::Link(name, LinkEvent::Start))
            .collect();
        self.drain(&mut work);
        self.finish_step(false)
    }

    /// Process one ingress event to completion.
    pub fn step(&mut self, event: Event) -> StepOutput {
        trace!(kind = event.kind(), "processing");
        let mut work = VecDeque::new();
        let mut shutdown = false;

        match event {
            Event::Transport { link, event } => self.route_transport(link, event, &mut work),
            Event::Timer(id) => match id {
                TimerId::Reconnect(link) => {
                    work.push_back(Work::Link(link, LinkEvent::ReconnectTimer))
                }
                TimerId::PeerSilence(link) => {
                    work.push_back(Work::Link(link, LinkEvent::PeerSilenceTimer))
                }
                TimerId::Poll(link) => work.push_back(Work::Link(link, LinkEvent::PollTimer)),
                TimerId::Ack(event_id) => {
                    work.push_back(Work::Ack(AckInput::AckTimerFired { event_id }))
                }
            },
            Event::EventJournaled { link, event_id } => {
                work.push_back(Work::Ack(AckInput::EventReady { link, event_id }))
            }
            Event::SubscribeStateChanges(cb) => self.state_subscribers.push(cb),
            Event::Shutdown => {
                info!("shutdown requested");
                for name in self.links.keys().cloned().collect::<Vec<_>>() {
                    work.push_back(Work::Link(name, LinkEvent::Stop));
                }
                shutdown = true;
            }
        }

        self.drain(&mut work);
        self.finish_step(shutdown)
    }

    // ─── Routing ────────────────────────────────────────────────────────

    fn route_transport(
        &mut self,
        link: LinkName,
        event: TransportEvent,
        work: &mut VecDeque<Work>,
    ) {
        let Some(entry) = self.links.get_mut(&link) else {
            warn!(%link, kind = event.kind(), "transport event for unknown link");
            return;
        };
        match event {
            TransportEvent::Connected => {
                entry.counters.connects += 1;
                work.push_back(Work::Link(link, LinkEvent::Connected));
            }
            TransportEvent::ConnectFailed { reason } => {
                work.push_back(Work::Link(link, LinkEvent::ConnectFailed { reason }));
            }
            TransportEvent::Disconnected { reason } => {
                entry.counters.disconnects += 1;
                work.push_back(Work::Link(link, LinkEvent::Disconnected { reason }));
            }
            TransportEvent::SubAck { topic } => {
                work.push_back(Work::Link(link, LinkEvent::SubAck { topic }));
            }
            TransportEvent::PubAck { ticket } => {
                work.push_back(Work::Ack(AckInput::PubAck { ticket }));
            }
            TransportEvent::Message { topic, payload } => {
                entry.counters.messages_received += 1;
                match entry.parser.parse_peer_message(&topic, &payload) {
                    Some(message) => {
                        work.push_back(Work::Link(link.clone(), LinkEvent::PeerMessage));
                        self.pending_deliveries.push((link, message));
                    }
                    None => {
                        trace!(%link, topic, "inbound message rejected by parser");
                    }
                }
            }
        }
    }

    // ─── Work draining ──────────────────────────────────────────────────

    fn drain(&mut self, work: &mut VecDeque<Work>) {
        while let Some(item) = work.pop_front() {
            match item {
                Work::Link(link, event) => {
                    let actions = match self.links.get_mut(&link) {
                        Some(entry) => {
                            entry.machine.set_time(self.now);
                            entry.machine.handle(event)
                        }
                        None => {
                            warn!(%link, "event for unknown link");
                            continue;
                        }
                    };
                    for action in actions {
                        self.apply_link_action(&link, action, work);
                    }
                }
                Work::Ack(input) => {
                    self.acks.set_time(self.now);
                    let outputs = self.acks.handle(input);
                    for output in outputs {
                        self.apply_ack_output(output, work);
                    }
                }
            }
        }
    }

    fn apply_link_action(&mut self, link: &LinkName, action: LinkAction, work: &mut VecDeque<Work>) {
        match action {
            LinkAction::Connect => {
                if let Some(entry) = self.links.get(link) {
                    entry.transport.connect();
                }
            }
            LinkAction::Disconnect => {
                if let Some(entry) = self.links.get(link) {
                    entry.transport.disconnect();
                }
            }
            LinkAction::Subscribe { topic } => {
                if let Some(entry) = self.links.get(link) {
                    entry.transport.subscribe(&topic);
                }
            }
            LinkAction::SetTimer { timer, duration } => {
                self.pending_timer_ops.push(TimerOp::Set {
                    id: link_timer_id(link, timer),
                    duration,
                });
            }
            LinkAction::CancelTimer { timer } => {
                self.pending_timer_ops.push(TimerOp::Cancel {
                    id: link_timer_id(link, timer),
                });
            }
            LinkAction::Notify(change) => self.deliver_state_change(change),
            LinkAction::AckLinkActive => {
                let backlog = self.journal.unacked_for(link);
                work.push_back(Work::Ack(AckInput::LinkActive {
                    link: link.clone(),
                    backlog,
                }));
            }
            LinkAction::AckLinkInactive => {
                work.push_back(Work::Ack(AckInput::LinkInactive { link: link.clone() }));
            }
            LinkAction::SendPing => self.send_ping(link),
        }
    }

    fn apply_ack_output(&mut self, output: AckOutput, work: &mut VecDeque<Work>) {
        match output {
            AckOutput::Publish { link, event_id } => match self.journal.load(event_id) {
                Ok(Some(payload)) => {
                    let Some(entry) = self.links.get_mut(&link) else {
                        work.push_back(Work::Ack(AckInput::PublishFailed { event_id }));
                        return;
                    };
                    let topic = entry.machine.config().egress_topic.clone();
                    let ticket = entry.transport.publish(&topic, payload);
                    entry.machine.note_send();
                    entry.counters.events_sent += 1;
                    trace!(%link, %event_id, %ticket, "event published");
                    work.push_back(Work::Ack(AckInput::Published { event_id, ticket }));
                }
                Ok(None) => {
                    warn!(%event_id, "journaled payload unavailable");
                    work.push_back(Work::Ack(AckInput::PublishFailed { event_id }));
                }
                Err(error) => {
                    warn!(%event_id, %error, "journal read failed");
                    work.push_back(Work::Ack(AckInput::PublishFailed { event_id }));
                }
            },
            AckOutput::StartAckTimer { event_id, duration } => {
                self.pending_timer_ops.push(TimerOp::Set {
                    id: TimerId::Ack(event_id),
                    duration,
                });
            }
            AckOutput::CancelAckTimer { event_id } => {
                self.pending_timer_ops.push(TimerOp::Cancel {
                    id: TimerId::Ack(event_id),
                });
            }
            AckOutput::RemoveFromJournal { event_id } => {
                if let Err(error) = self.journal.remove(event_id) {
                    warn!(%event_id, %error, "journal remove failed");
                }
            }
            AckOutput::AckTimedOut { link, event_id } => {
                if let Some(entry) = self.links.get_mut(&link) {
                    entry.counters.ack_timeouts += 1;
                }
                work.push_back(Work::Link(link, LinkEvent::AckTimeout));
            }
        }
    }

    fn send_ping(&mut self, link: &LinkName) {
        let Some(entry) = self.links.get_mut(link) else {
            return;
        };
        if let Some(payload) = entry.parser.ping_payload() {
            let topic = entry.machine.config().egress_topic.clone();
            entry.transport.publish(&topic, payload);
            entry.machine.note_send();
            trace!(%link, "ping published");
        }
    }

    fn deliver_state_change(&mut self, change: StateChange) {
        debug!(
            link = %change.link,
            from = %change.from,
            to = %change.to,
            reason = change.reason.as_str(),
            "link state change"
        );
        for subscriber in &self.state_subscribers {
            subscriber(&change);
        }
    }

    // ─── Step epilogue ──────────────────────────────────────────────────

    fn finish_step(&mut self, shutdown: bool) -> StepOutput {
        for (link, message) in std::mem::take(&mut self.pending_deliveries) {
            for subscriber in &self.message_subscribers {
                subscriber(&link, &message);
            }
        }
        self.publish_snapshots();
        StepOutput {
            timer_ops: std::mem::take(&mut self.pending_timer_ops),
            shutdown,
        }
    }

    fn publish_snapshots(&self) {
        let mut snapshots = self.snapshots.write().unwrap();
        for (name, entry) in &self.links {
            snapshots.insert(
                name.clone(),
                LinkStats {
                    state: entry.machine.state(),
                    in_flight: self.acks.in_flight_count(name),
                    unacked_backlog: self.journal.count_unacked_for(name),
                    last_peer_seen: entry.machine.last_peer_seen(),
                    messages_received: entry.counters.messages_received,
                    events_sent: entry.counters.events_sent,
                    ack_timeouts: entry.counters.ack_timeouts,
                    connects: entry.counters.connects,
                    disconnects: entry.counters.disconnects,
                },
            );
        }
    }
}

fn link_timer_id(link: &LinkName, timer: LinkTimer) -> TimerId {
    match timer {
        LinkTimer::Reconnect => TimerId::Reconnect(link.clone()),
        LinkTimer::PeerSilence => TimerId::PeerSilence(link.clone()),
        LinkTimer::Poll => TimerId::Poll(link.clone()),
    }
}

impl std::fmt::Debug for CoreLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreLoop")
            .field("links", &self.links.len())
            .field("now", &self.now)
            .finish()
    }
}
