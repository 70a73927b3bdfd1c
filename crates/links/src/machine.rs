//! Link communication-state machine.
//!
//! One instance per external link. Consumes transport events, ack signals,
//! and timer ticks; decides whether communication is "active" in the
//! application sense.
//!
//! # Activation
//!
//! Two conditions accumulate independently once the transport connects:
//! every configured subscription acknowledged, and a valid peer message seen.
//! The pair `AwaitingSetup` / `AwaitingPeer` is exactly the projection of
//! which condition is still outstanding, so subacks and peer traffic may
//! arrive in any order. Outbound ack timeliness is a demoter only once
//! `Active` has been reached — it never blocks initial activation.
//!
//! # Demotion
//!
//! Ack starvation and peer silence demote `Active → AwaitingPeer` without
//! touching the transport; a transport disconnect from any connected state
//! falls back to `Connecting` and clears the subscription sets. In-flight
//! publishes are discarded on leaving `Active` and replayed from the journal
//! on the next activation.

use gridlink_core::{
    LinkConfig, LinkName, LinkStateName, StateChange, StateChangeReason,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Inputs consumed by [`LinkMachine::handle`].
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Start,
    Stop,
    /// Transport connection established.
    Connected,
    /// Connect attempt failed before the connection was established.
    ConnectFailed { reason: String },
    /// Established connection lost.
    Disconnected { reason: String },
    /// Reconnect backoff delay elapsed.
    ReconnectTimer,
    /// The broker acknowledged a subscription.
    SubAck { topic: String },
    /// A validated application message from the expected peer arrived.
    PeerMessage,
    /// The ack engine observed no `PubAck` within the ack timeout.
    AckTimeout,
    /// Peer inactivity watchdog fired.
    PeerSilenceTimer,
    /// Keepalive poll cadence fired.
    PollTimer,
}

/// Timers owned by the machine, scoped to its link by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTimer {
    Reconnect,
    PeerSilence,
    Poll,
}

/// Actions returned by [`LinkMachine::handle`] for the dispatcher to execute.
#[derive(Debug, Clone)]
pub enum LinkAction {
    /// Ask the transport adapter to connect.
    Connect,
    /// Ask the transport adapter to disconnect.
    Disconnect,
    /// Subscribe to an ingress topic.
    Subscribe { topic: String },
    /// Arm a single-fire timer (replaces an armed timer of the same kind).
    SetTimer { timer: LinkTimer, duration: Duration },
    CancelTimer { timer: LinkTimer },
    /// Fan out a state-change notification.
    Notify(StateChange),
    /// The link entered `Active`: the ack engine replays the backlog.
    AckLinkActive,
    /// The link left `Active`: the ack engine discards in-flight records.
    AckLinkInactive,
    /// Publish a keepalive frame on the egress topic, if the protocol has one.
    SendPing,
}

/// Per-link communication FSM.
pub struct LinkMachine {
    config: LinkConfig,
    state: LinkStateName,
    pending_subs: BTreeSet<String>,
    acked_subs: BTreeSet<String>,
    last_peer_seen: Option<Duration>,
    last_send: Option<Duration>,
    connect_attempts: u32,
    now: Duration,
}

impl LinkMachine {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: LinkStateName::NotStarted,
            pending_subs: BTreeSet::new(),
            acked_subs: BTreeSet::new(),
            last_peer_seen: None,
            last_send: None,
            connect_attempts: 0,
            now: Duration::ZERO,
        }
    }

    /// Set the current time. Called before each `handle()`.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn name(&self) -> &LinkName {
        &self.config.name
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> LinkStateName {
        self.state
    }

    pub fn last_peer_seen(&self) -> Option<Duration> {
        self.last_peer_seen
    }

    pub fn pending_subs(&self) -> &BTreeSet<String> {
        &self.pending_subs
    }

    pub fn acked_subs(&self) -> &BTreeSet<String> {
        &self.acked_subs
    }

    /// Record an outbound publish on this link (keepalive suppression).
    pub fn note_send(&mut self) {
        self.last_send = Some(self.now);
    }

    /// Process one input, returning actions for the dispatcher.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkAction> {
        match event {
            LinkEvent::Start => self.on_start(),
            LinkEvent::Stop => self.on_stop(),
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::ConnectFailed { reason } => self.on_connect_failed(&reason),
            LinkEvent::Disconnected { reason } => self.on_disconnected(&reason),
            LinkEvent::ReconnectTimer => self.on_reconnect_timer(),
            LinkEvent::SubAck { topic } => self.on_suback(topic),
            LinkEvent::PeerMessage => self.on_peer_message(),
            LinkEvent::AckTimeout => self.on_ack_timeout(),
            LinkEvent::PeerSilenceTimer => self.on_peer_silence_timer(),
            LinkEvent::PollTimer => self.on_poll_timer(),
        }
    }

    // ─── Input handlers ─────────────────────────────────────────────────

    fn on_start(&mut self) -> Vec<LinkAction> {
        if self.state != LinkStateName::NotStarted {
            warn!(link = %self.config.name, state = %self.state, "Start ignored");
            return vec![];
        }
        self.enter_connecting(StateChangeReason::Started)
    }

    fn on_connected(&mut self) -> Vec<LinkAction> {
        if self.state != LinkStateName::Connecting {
            warn!(link = %self.config.name, state = %self.state, "Connected ignored");
            return vec![];
        }
        self.connect_attempts = 0;
        self.pending_subs = self.config.ingress_topics.iter().cloned().collect();
        self.acked_subs.clear();

        let mut actions = vec![LinkAction::CancelTimer {
            timer: LinkTimer::Reconnect,
        }];
        actions.extend(self.transition(
            LinkStateName::AwaitingSetupAndPeer,
            StateChangeReason::TransportConnected,
        ));
        for topic in &self.config.ingress_topics {
            actions.push(LinkAction::Subscribe {
                topic: topic.clone(),
            });
        }
        actions
    }

    fn on_connect_failed(&mut self, reason: &str) -> Vec<LinkAction> {
        if self.state != LinkStateName::Connecting {
            warn!(link = %self.config.name, state = %self.state, reason, "ConnectFailed ignored");
            return vec![];
        }
        let delay = self.config.reconnect_backoff.delay(self.connect_attempts);
        self.connect_attempts = self.connect_attempts.saturating_add(1);
        debug!(
            link = %self.config.name,
            reason,
            retry_in = ?delay,
            attempt = self.connect_attempts,
            "connect failed"
        );
        vec![
            self.notify(
                LinkStateName::Connecting,
                LinkStateName::Connecting,
                StateChangeReason::TransportConnectFailed,
            ),
            LinkAction::SetTimer {
                timer: LinkTimer::Reconnect,
                duration: delay,
            },
        ]
    }

    fn on_disconnected(&mut self, reason: &str) -> Vec<LinkAction> {
        match self.state {
            LinkStateName::AwaitingSetupAndPeer
            | LinkStateName::AwaitingSetup
            | LinkStateName::AwaitingPeer
            | LinkStateName::Active => {
                debug!(link = %self.config.name, reason, "transport disconnected");
                self.enter_connecting(StateChangeReason::TransportDisconnected)
            }
            LinkStateName::Connecting => {
                debug!(link = %self.config.name, reason, "disconnect while connecting ignored");
                vec![]
            }
            LinkStateName::NotStarted | LinkStateName::Stopped => vec![],
        }
    }

    fn on_reconnect_timer(&mut self) -> Vec<LinkAction> {
        if self.state != LinkStateName::Connecting {
            return vec![];
        }
        vec![LinkAction::Connect]
    }

    fn on_suback(&mut self, topic: String) -> Vec<LinkAction> {
        match self.state {
            LinkStateName::AwaitingSetupAndPeer | LinkStateName::AwaitingSetup => {
                if !self.pending_subs.remove(&topic) {
                    debug!(link = %self.config.name, topic, "duplicate suback ignored");
                    return vec![];
                }
                self.acked_subs.insert(topic);
                if !self.pending_subs.is_empty() {
                    return vec![];
                }
                if self.state == LinkStateName::AwaitingSetupAndPeer {
                    self.transition(LinkStateName::AwaitingPeer, StateChangeReason::AllSubsAcked)
                } else if self.peer_fresh() {
                    self.transition(LinkStateName::Active, StateChangeReason::AllSubsAcked)
                } else {
                    // The peer went quiet while subscriptions completed;
                    // Active requires a recently heard peer at entry.
                    self.transition(LinkStateName::AwaitingPeer, StateChangeReason::AllSubsAcked)
                }
            }
            _ => {
                debug!(link = %self.config.name, topic, state = %self.state, "suback ignored");
                vec![]
            }
        }
    }

    fn on_peer_message(&mut self) -> Vec<LinkAction> {
        match self.state {
            LinkStateName::AwaitingSetupAndPeer => {
                self.last_peer_seen = Some(self.now);
                self.transition(LinkStateName::AwaitingSetup, StateChangeReason::PeerMessage)
            }
            LinkStateName::AwaitingPeer => {
                self.last_peer_seen = Some(self.now);
                self.transition(LinkStateName::Active, StateChangeReason::PeerMessage)
            }
            LinkStateName::Active => {
                self.last_peer_seen = Some(self.now);
                vec![LinkAction::SetTimer {
                    timer: LinkTimer::PeerSilence,
                    duration: self.config.peer_silence_timeout,
                }]
            }
            LinkStateName::AwaitingSetup => {
                self.last_peer_seen = Some(self.now);
                vec![]
            }
            _ => vec![],
        }
    }

    fn on_ack_timeout(&mut self) -> Vec<LinkAction> {
        if self.state != LinkStateName::Active {
            debug!(link = %self.config.name, state = %self.state, "ack timeout ignored");
            return vec![];
        }
        // Demote; do not disconnect. The transport may be fine while the
        // peer's application is not.
        self.transition(LinkStateName::AwaitingPeer, StateChangeReason::AckTimeout)
    }

    fn on_peer_silence_timer(&mut self) -> Vec<LinkAction> {
        if self.state != LinkStateName::Active {
            return vec![];
        }
        match self.last_peer_seen {
            Some(seen) => {
                let elapsed = self.now.saturating_sub(seen);
                if elapsed >= self.config.peer_silence_timeout {
                    self.transition(LinkStateName::AwaitingPeer, StateChangeReason::PeerSilence)
                } else {
                    vec![LinkAction::SetTimer {
                        timer: LinkTimer::PeerSilence,
                        duration: self.config.peer_silence_timeout - elapsed,
                    }]
                }
            }
            None => self.transition(LinkStateName::AwaitingPeer, StateChangeReason::PeerSilence),
        }
    }

    fn on_poll_timer(&mut self) -> Vec<LinkAction> {
        if !matches!(
            self.state,
            LinkStateName::AwaitingPeer | LinkStateName::Active
        ) {
            return vec![];
        }
        match self.last_send {
            Some(sent) if self.now.saturating_sub(sent) < self.config.poll_interval => {
                vec![LinkAction::SetTimer {
                    timer: LinkTimer::Poll,
                    duration: self.config.poll_interval - self.now.saturating_sub(sent),
                }]
            }
            _ => vec![
                LinkAction::SendPing,
                LinkAction::SetTimer {
                    timer: LinkTimer::Poll,
                    duration: self.config.poll_interval,
                },
            ],
        }
    }

    fn on_stop(&mut self) -> Vec<LinkAction> {
        if self.state == LinkStateName::Stopped {
            return vec![];
        }
        let connected = !matches!(self.state, LinkStateName::NotStarted);
        let mut actions = self.transition(LinkStateName::Stopped, StateChangeReason::Stopped);
        actions.push(LinkAction::CancelTimer {
            timer: LinkTimer::Reconnect,
        });
        if connected {
            actions.push(LinkAction::Disconnect);
        }
        actions
    }

    // ─── Transition helpers ─────────────────────────────────────────────

    fn peer_fresh(&self) -> bool {
        self.last_peer_seen
            .is_some_and(|seen| self.now.saturating_sub(seen) <= self.config.peer_silence_timeout)
    }

    fn enter_connecting(&mut self, reason: StateChangeReason) -> Vec<LinkAction> {
        self.pending_subs.clear();
        self.acked_subs.clear();
        self.last_peer_seen = None;
        let mut actions = self.transition(LinkStateName::Connecting, reason);
        actions.push(LinkAction::Connect);
        actions
    }

    /// Move to `to`, emitting the notification and the ack-engine / timer
    /// coupling implied by entering or leaving the active and send-active
    /// regions.
    fn transition(&mut self, to: LinkStateName, reason: StateChangeReason) -> Vec<LinkAction> {
        let from = self.state;
        self.state = to;

        let mut actions = vec![self.notify(from, to, reason)];

        let was_active = from == LinkStateName::Active;
        let is_active = to == LinkStateName::Active;
        if was_active && !is_active {
            actions.push(LinkAction::CancelTimer {
                timer: LinkTimer::PeerSilence,
            });
            actions.push(LinkAction::AckLinkInactive);
        }
        if is_active && !was_active {
            actions.push(LinkAction::SetTimer {
                timer: LinkTimer::PeerSilence,
                duration: self.config.peer_silence_timeout,
            });
            actions.push(LinkAction::AckLinkActive);
        }

        // The send path is usable with all subscriptions acked, i.e. in
        // AwaitingPeer and Active. Ping on entry so a quiet peer has
        // something to respond to, then keep the poll cadence armed.
        let was_send_active = matches!(
            from,
            LinkStateName::AwaitingPeer | LinkStateName::Active
        );
        let is_send_active = matches!(to, LinkStateName::AwaitingPeer | LinkStateName::Active);
        if is_send_active && !was_send_active {
            actions.push(LinkAction::SendPing);
            actions.push(LinkAction::SetTimer {
                timer: LinkTimer::Poll,
                duration: self.config.poll_interval,
            });
        }
        if was_send_active && !is_send_active {
            actions.push(LinkAction::CancelTimer {
                timer: LinkTimer::Poll,
            });
        }

        actions
    }

    fn notify(
        &self,
        from: LinkStateName,
        to: LinkStateName,
        reason: StateChangeReason,
    ) -> LinkAction {
        LinkAction::Notify(StateChange {
            link: self.config.name.clone(),
            from,
            to,
            reason,
            at: self.now,
        })
    }
}
