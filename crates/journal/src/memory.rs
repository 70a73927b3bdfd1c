//! In-memory journal for tests and simulation.

use crate::{Journal, JournalError, JournaledEvent};
use gridlink_core::{EventId, LinkName};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
struct Entry {
    link: LinkName,
    created_at: std::time::Duration,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
    full: bool,
}

/// [`Journal`] backed by a `BTreeMap`. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    inner: Mutex<Inner>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail with `StorageFull`, for fault-path tests.
    pub fn set_full(&self, full: bool) {
        self.inner.lock().unwrap().full = full;
    }
}

impl Journal for MemoryJournal {
    fn append(&self, link: &LinkName, payload: &[u8]) -> Result<EventId, JournalError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.full {
            return Err(JournalError::StorageFull {
                needed: payload.len() as u64,
                remaining: 0,
                max_bytes: 0,
            });
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                link: link.clone(),
                created_at: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default(),
                payload: payload.to_vec(),
            },
        );
        Ok(EventId(id))
    }

    fn load(&self, id: EventId) -> Result<Option<Vec<u8>>, JournalError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.entries.get(&id.0).map(|e| e.payload.clone()))
    }

    fn remove(&self, id: EventId) -> Result<(), JournalError> {
        self.inner.lock().unwrap().entries.remove(&id.0);
        Ok(())
    }

    fn unacked(&self) -> Vec<JournaledEvent> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .map(|(&id, entry)| JournaledEvent {
                event_id: EventId(id),
                link: entry.link.clone(),
                created_at: entry.created_at,
            })
            .collect()
    }

    fn contains(&self, id: EventId) -> bool {
        self.inner.lock().unwrap().entries.contains_key(&id.0)
    }

    fn count_unacked(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
