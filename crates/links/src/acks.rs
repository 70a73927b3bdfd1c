//! Ack / retransmit engine for journaled outbound events.
//!
//! Tracks the publications of journaled events that are outstanding on the
//! transport, bounded by the in-flight window. The engine never touches the
//! journal or the transport itself: it emits outputs and the dispatcher
//! performs the I/O, feeding results back as inputs.
//!
//! # Lifecycle of one event
//!
//! ```text
//! EventReady ──window free──► Publish + StartAckTimer
//!     │                            │
//!     └──window full──► backlog    ├─ PubAck ──► CancelAckTimer + RemoveFromJournal
//!                                  └─ AckTimerFired ──► AckTimedOut (link demoted)
//! ```
//!
//! On `LinkInactive`, in-flight records and the backlog are discarded; the
//! events are still journaled and replay in creation order on the next
//! `LinkActive`. Acks arriving out of order are accepted as-is; the peer
//! dedupes by event id.

use gridlink_core::{EventId, LinkName, PublishTicket};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Ack engine configuration.
#[derive(Debug, Clone)]
pub struct AckConfig {
    /// Maximum outstanding publications per link.
    pub max_in_flight: usize,
    /// How long a publication may await its `PubAck`. Links can override
    /// this via [`AckEngine::set_link_ack_timeout`].
    pub ack_timeout: Duration,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// One outstanding publication.
#[derive(Debug)]
struct InFlight {
    link: LinkName,
    ticket: Option<PublishTicket>,
    #[allow(dead_code)]
    sent_at: Duration,
}

/// Inputs consumed by [`AckEngine::handle`].
#[derive(Debug)]
pub enum AckInput {
    /// A link entered `Active`; `backlog` is its unacked journal backlog in
    /// creation order.
    LinkActive {
        link: LinkName,
        backlog: Vec<EventId>,
    },
    /// A link left `Active`.
    LinkInactive { link: LinkName },
    /// The application journaled a new event for `link`.
    EventReady { link: LinkName, event_id: EventId },
    /// The dispatcher published an event and obtained its ticket.
    Published {
        event_id: EventId,
        ticket: PublishTicket,
    },
    /// The dispatcher could not produce the publication (journal read
    /// failed). The event remains journaled.
    PublishFailed { event_id: EventId },
    /// The broker acknowledged a publication.
    PubAck { ticket: PublishTicket },
    /// The ack deadline for an event elapsed.
    AckTimerFired { event_id: EventId },
}

/// Outputs of [`AckEngine::handle`], executed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutput {
    /// Load the event payload from the journal and publish it on the link's
    /// egress topic, then feed back `Published` (or `PublishFailed`).
    Publish { link: LinkName, event_id: EventId },
    /// Arm the ack deadline for an event.
    StartAckTimer { event_id: EventId, duration: Duration },
    CancelAckTimer { event_id: EventId },
    /// The event is acked; drop it from the journal. Only an observed ack
    /// produces this — nothing else removes a journaled event.
    RemoveFromJournal { event_id: EventId },
    /// The publication cannot make progress (ack starvation, or its payload
    /// could not be read): raise `AckTimeout` to the link state machine.
    AckTimedOut { link: LinkName, event_id: EventId },
}

/// Tracks in-flight publications and the per-link replay backlog.
pub struct AckEngine {
    config: AckConfig,
    active: HashSet<LinkName>,
    in_flight: HashMap<EventId, InFlight>,
    by_ticket: HashMap<PublishTicket, EventId>,
    backlog: HashMap<LinkName, VecDeque<EventId>>,
    link_timeouts: HashMap<LinkName, Duration>,
    now: Duration,
}

impl AckEngine {
    pub fn new(config: AckConfig) -> Self {
        Self {
            config,
            active: HashSet::new(),
            in_flight: HashMap::new(),
            by_ticket: HashMap::new(),
            backlog: HashMap::new(),
            link_timeouts: HashMap::new(),
            now: Duration::ZERO,
        }
    }

    /// Set the current time. Called before each `handle()`.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Override the ack timeout for one link.
    pub fn set_link_ack_timeout(&mut self, link: LinkName, timeout: Duration) {
        self.link_timeouts.insert(link, timeout);
    }

    fn ack_timeout_for(&self, link: &LinkName) -> Duration {
        self.link_timeouts
            .get(link)
            .copied()
            .unwrap_or(self.config.ack_timeout)
    }

    /// Outstanding publications on `link`.
    pub fn in_flight_count(&self, link: &LinkName) -> usize {
        self.in_flight.values().filter(|f| &f.link == link).count()
    }

    /// Events queued behind the in-flight window on `link`.
    pub fn backlog_len(&self, link: &LinkName) -> usize {
        self.backlog.get(link).map_or(0, VecDeque::len)
    }

    /// Process one input, returning outputs for the dispatcher.
    pub fn handle(&mut self, input: AckInput) -> Vec<AckOutput> {
        match input {
            AckInput::LinkActive { link, backlog } => self.on_link_active(link, backlog),
            AckInput::LinkInactive { link } => self.on_link_inactive(link),
            AckInput::EventReady { link, event_id } => self.on_event_ready(link, event_id),
            AckInput::Published { event_id, ticket } => self.on_published(event_id, ticket),
            AckInput::PublishFailed { event_id } => self.on_publish_failed(event_id),
            AckInput::PubAck { ticket } => self.on_puback(ticket),
            AckInput::AckTimerFired { event_id } => self.on_ack_timer(event_id),
        }
    }

    // ─── Input handlers ─────────────────────────────────────────────────

    fn on_link_active(&mut self, link: LinkName, backlog: Vec<EventId>) -> Vec<AckOutput> {
        self.active.insert(link.clone());
        let queue = self.backlog.entry(link.clone()).or_default();
        queue.clear();
        for event_id in backlog {
            // A replayed id can never already be in flight: deactivation
            // discarded all in-flight records before this point.
            if !self.in_flight.contains_key(&event_id) {
                queue.push_back(event_id);
            }
        }
        debug!(%link, backlog = self.backlog_len(&link), "link active, replaying backlog");
        self.fill_window(&link)
    }

    fn on_link_inactive(&mut self, link: LinkName) -> Vec<AckOutput> {
        self.active.remove(&link);
        self.backlog.remove(&link);

        let discarded: Vec<EventId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.link == link)
            .map(|(&id, _)| id)
            .collect();
        let mut outputs = Vec::with_capacity(discarded.len());
        for event_id in discarded {
            if let Some(flight) = self.in_flight.remove(&event_id) {
                if let Some(ticket) = flight.ticket {
                    self.by_ticket.remove(&ticket);
                }
                outputs.push(AckOutput::CancelAckTimer { event_id });
            }
        }
        debug!(%link, discarded = outputs.len(), "link inactive, discarded in-flight");
        outputs
    }

    fn on_event_ready(&mut self, link: LinkName, event_id: EventId) -> Vec<AckOutput> {
        if !self.active.contains(&link) {
            // Journaled; it replays when the link next activates.
            trace!(%link, %event_id, "event ready on inactive link");
            return vec![];
        }
        self.backlog.entry(link.clone()).or_default().push_back(event_id);
        self.fill_window(&link)
    }

    fn on_published(&mut self, event_id: EventId, ticket: PublishTicket) -> Vec<AckOutput> {
        match self.in_flight.get_mut(&event_id) {
            Some(flight) => {
                flight.ticket = Some(ticket);
                self.by_ticket.insert(ticket, event_id);
            }
            None => warn!(%event_id, %ticket, "publication reported for unknown event"),
        }
        vec![]
    }

    fn on_publish_failed(&mut self, event_id: EventId) -> Vec<AckOutput> {
        let Some(flight) = self.in_flight.remove(&event_id) else {
            return vec![];
        };
        if let Some(ticket) = flight.ticket {
            self.by_ticket.remove(&ticket);
        }
        // The event stays journaled and replays on the next activation; the
        // link is demoted so the backlog is not hammered against a faulting
        // journal.
        warn!(%event_id, link = %flight.link, "publication could not be produced");
        vec![
            AckOutput::CancelAckTimer { event_id },
            AckOutput::AckTimedOut {
                link: flight.link,
                event_id,
            },
        ]
    }

    fn on_puback(&mut self, ticket: PublishTicket) -> Vec<AckOutput> {
        let Some(event_id) = self.by_ticket.remove(&ticket) else {
            // An ack for a publication from a previous active period; the
            // retransmit will be acked in its own right.
            debug!(%ticket, "puback for unknown ticket ignored");
            return vec![];
        };
        let Some(flight) = self.in_flight.remove(&event_id) else {
            return vec![];
        };
        trace!(%event_id, %ticket, link = %flight.link, "event acked");
        let mut outputs = vec![
            AckOutput::CancelAckTimer { event_id },
            AckOutput::RemoveFromJournal { event_id },
        ];
        outputs.extend(self.fill_window(&flight.link));
        outputs
    }

    fn on_ack_timer(&mut self, event_id: EventId) -> Vec<AckOutput> {
        match self.in_flight.get(&event_id) {
            Some(flight) => {
                // Leave the in-flight record; it is discarded when the link
                // leaves Active in response to this.
                warn!(%event_id, link = %flight.link, "ack timeout");
                vec![AckOutput::AckTimedOut {
                    link: flight.link.clone(),
                    event_id,
                }]
            }
            None => vec![],
        }
    }

    // ─── Window management ──────────────────────────────────────────────

    /// Start publications from the backlog up to the in-flight window.
    fn fill_window(&mut self, link: &LinkName) -> Vec<AckOutput> {
        let mut outputs = Vec::new();
        while self.in_flight_count(link) < self.config.max_in_flight {
            let Some(event_id) = self.backlog.get_mut(link).and_then(VecDeque::pop_front) else {
                break;
            };
            self.in_flight.insert(
                event_id,
                InFlight {
                    link: link.clone(),
                    ticket: None,
                    sent_at: self.now,
                },
            );
            outputs.push(AckOutput::Publish {
                link: link.clone(),
                event_id,
            });
            outputs.push(AckOutput::StartAckTimer {
                event_id,
                duration: self.ack_timeout_for(link),
            });
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(name: &str) -> LinkName {
        LinkName::new(name)
    }

    fn engine(max_in_flight: usize) -> AckEngine {
        AckEngine::new(AckConfig {
            max_in_flight,
            ack_timeout: Duration::from_secs(5),
        })
    }

    fn publishes(outputs: &[AckOutput]) -> Vec<EventId> {
        outputs
            .iter()
            .filter_map(|o| match o {
                AckOutput::Publish { event_id, .. } => Some(*event_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn replays_backlog_in_creation_order_up_to_window() {
        let mut e = engine(2);
        let outputs = e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1), EventId(2), EventId(3)],
        });
        assert_eq!(publishes(&outputs), vec![EventId(1), EventId(2)]);
        assert_eq!(e.in_flight_count(&link("up")), 2);
        assert_eq!(e.backlog_len(&link("up")), 1);
        // Each publish carries its ack deadline.
        assert_eq!(
            outputs
                .iter()
                .filter(|o| matches!(o, AckOutput::StartAckTimer { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn puback_removes_journal_entry_and_advances_backlog() {
        let mut e = engine(1);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1), EventId(2)],
        });
        e.handle(AckInput::Published {
            event_id: EventId(1),
            ticket: PublishTicket(10),
        });

        let outputs = e.handle(AckInput::PubAck {
            ticket: PublishTicket(10),
        });
        assert!(outputs.contains(&AckOutput::RemoveFromJournal { event_id: EventId(1) }));
        assert!(outputs.contains(&AckOutput::CancelAckTimer { event_id: EventId(1) }));
        assert_eq!(publishes(&outputs), vec![EventId(2)]);
        assert_eq!(e.in_flight_count(&link("up")), 1);
    }

    #[test]
    fn event_ready_publishes_immediately_when_window_free() {
        let mut e = engine(8);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![],
        });
        let outputs = e.handle(AckInput::EventReady {
            link: link("up"),
            event_id: EventId(7),
        });
        assert_eq!(publishes(&outputs), vec![EventId(7)]);
    }

    #[test]
    fn event_ready_waits_when_window_full() {
        let mut e = engine(1);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1)],
        });
        let outputs = e.handle(AckInput::EventReady {
            link: link("up"),
            event_id: EventId(2),
        });
        assert!(publishes(&outputs).is_empty());
        assert_eq!(e.backlog_len(&link("up")), 1);
    }

    #[test]
    fn event_ready_on_inactive_link_stays_journaled() {
        let mut e = engine(8);
        let outputs = e.handle(AckInput::EventReady {
            link: link("up"),
            event_id: EventId(1),
        });
        assert!(outputs.is_empty());
        assert_eq!(e.in_flight_count(&link("up")), 0);
    }

    #[test]
    fn ack_timer_raises_timeout_and_keeps_in_flight() {
        let mut e = engine(8);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1)],
        });
        let outputs = e.handle(AckInput::AckTimerFired { event_id: EventId(1) });
        assert_eq!(
            outputs,
            vec![AckOutput::AckTimedOut {
                link: link("up"),
                event_id: EventId(1),
            }]
        );
        assert_eq!(e.in_flight_count(&link("up")), 1);
    }

    #[test]
    fn deactivation_discards_in_flight_and_replay_retransmits() {
        let mut e = engine(8);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1)],
        });
        e.handle(AckInput::Published {
            event_id: EventId(1),
            ticket: PublishTicket(10),
        });

        let outputs = e.handle(AckInput::LinkInactive { link: link("up") });
        assert!(outputs.contains(&AckOutput::CancelAckTimer { event_id: EventId(1) }));
        assert_eq!(e.in_flight_count(&link("up")), 0);

        // The journal still holds the event; reactivation retransmits it.
        let outputs = e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1)],
        });
        assert_eq!(publishes(&outputs), vec![EventId(1)]);

        // A late ack for the first publication is ignored; the retransmit's
        // ack clears the event.
        assert!(e
            .handle(AckInput::PubAck { ticket: PublishTicket(10) })
            .is_empty());
        e.handle(AckInput::Published {
            event_id: EventId(1),
            ticket: PublishTicket(11),
        });
        let outputs = e.handle(AckInput::PubAck { ticket: PublishTicket(11) });
        assert!(outputs.contains(&AckOutput::RemoveFromJournal { event_id: EventId(1) }));
    }

    #[test]
    fn out_of_order_acks_are_accepted() {
        let mut e = engine(8);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1), EventId(2)],
        });
        e.handle(AckInput::Published {
            event_id: EventId(1),
            ticket: PublishTicket(10),
        });
        e.handle(AckInput::Published {
            event_id: EventId(2),
            ticket: PublishTicket(11),
        });

        let outputs = e.handle(AckInput::PubAck { ticket: PublishTicket(11) });
        assert!(outputs.contains(&AckOutput::RemoveFromJournal { event_id: EventId(2) }));
        let outputs = e.handle(AckInput::PubAck { ticket: PublishTicket(10) });
        assert!(outputs.contains(&AckOutput::RemoveFromJournal { event_id: EventId(1) }));
    }

    #[test]
    fn publish_failure_demotes_and_keeps_event_journaled() {
        let mut e = engine(1);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1), EventId(2)],
        });
        let outputs = e.handle(AckInput::PublishFailed { event_id: EventId(1) });
        // Never a journal removal without an ack.
        assert!(!outputs
            .iter()
            .any(|o| matches!(o, AckOutput::RemoveFromJournal { .. })));
        assert!(outputs.contains(&AckOutput::CancelAckTimer { event_id: EventId(1) }));
        assert!(outputs.contains(&AckOutput::AckTimedOut {
            link: link("up"),
            event_id: EventId(1),
        }));
        assert_eq!(e.in_flight_count(&link("up")), 0);

        // The ensuing demotion clears the backlog; the next activation
        // retries both events from the journal.
        e.handle(AckInput::LinkInactive { link: link("up") });
        let outputs = e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1), EventId(2)],
        });
        assert_eq!(publishes(&outputs), vec![EventId(1)]);
    }

    #[test]
    fn links_have_independent_windows() {
        let mut e = engine(1);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1)],
        });
        let outputs = e.handle(AckInput::LinkActive {
            link: link("down"),
            backlog: vec![EventId(2)],
        });
        assert_eq!(publishes(&outputs), vec![EventId(2)]);
        assert_eq!(e.in_flight_count(&link("up")), 1);
        assert_eq!(e.in_flight_count(&link("down")), 1);
    }

    #[test]
    fn no_event_is_in_flight_twice() {
        let mut e = engine(8);
        e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1)],
        });
        // A replay listing an id that is somehow still in flight must not
        // double-publish it.
        let outputs = e.handle(AckInput::LinkActive {
            link: link("up"),
            backlog: vec![EventId(1)],
        });
        assert!(publishes(&outputs).is_empty());
        assert_eq!(e.in_flight_count(&link("up")), 1);
    }
}
