//! Durable journal of outbound events awaiting peer acknowledgement.
//!
//! Locally generated events are appended here before anything else happens to
//! them, survive process restarts, and are removed only when the peer's
//! acknowledgement is observed. The ack/retransmit engine replays the unacked
//! backlog whenever a link returns to active.
//!
//! All methods take `&self` — implementations use interior mutability, since
//! `append` is reachable from the façade thread while the rest of the journal
//! is driven from the dispatcher.

mod error;
mod fs;
mod memory;

pub use error::JournalError;
pub use fs::FileJournal;
pub use memory::MemoryJournal;

use gridlink_core::{EventId, LinkName};
use std::time::Duration;

/// Index entry for one journaled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournaledEvent {
    pub event_id: EventId,
    pub link: LinkName,
    /// Creation time, as a duration since the UNIX epoch.
    pub created_at: Duration,
}

/// Abstracts the persistent event store for both production and tests.
pub trait Journal: Send + Sync {
    /// Persist an event payload for `link` and assign it the next event id.
    ///
    /// On `Ok`, the event is guaranteed recoverable after a process crash.
    fn append(&self, link: &LinkName, payload: &[u8]) -> Result<EventId, JournalError>;

    /// Load the payload of a journaled event. `None` if the id is not
    /// pending (never journaled, or already removed).
    fn load(&self, id: EventId) -> Result<Option<Vec<u8>>, JournalError>;

    /// Remove an acked event. Idempotent; quietly succeeds if absent.
    fn remove(&self, id: EventId) -> Result<(), JournalError>;

    /// All unacked events, oldest first.
    fn unacked(&self) -> Vec<JournaledEvent>;

    /// Whether an event id is still pending.
    fn contains(&self, id: EventId) -> bool;

    /// Unacked event ids targeting `link`, oldest first.
    fn unacked_for(&self, link: &LinkName) -> Vec<EventId> {
        self.unacked()
            .into_iter()
            .filter(|e| &e.link == link)
            .map(|e| e.event_id)
            .collect()
    }

    /// Number of unacked events across all links.
    fn count_unacked(&self) -> usize {
        self.unacked().len()
    }

    /// Number of unacked events targeting `link`.
    fn count_unacked_for(&self, link: &LinkName) -> usize {
        self.unacked().iter().filter(|e| &e.link == link).count()
    }
}
