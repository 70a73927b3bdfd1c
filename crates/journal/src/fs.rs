//! Directory-backed journal.
//!
//! Layout, inside the configured directory:
//!
//! - `<event_id>.ev` — payload bytes, verbatim
//! - `<event_id>.meta` — JSON sidecar with creation time and target link
//! - `next_id` — the id counter, advanced and fsync'd before an id is handed
//!   out, so ids stay monotonic across restarts
//!
//! `append` writes the sidecar before the payload file and fsyncs both plus
//! the directory; recovery keys off `.ev` files, so a crash mid-append leaves
//! at worst an orphan sidecar, never a half-indexed event. Removal deletes
//! both files. Duplicate delivery after a crash-before-tombstone is expected;
//! peers dedupe on the event id.

use crate::{Journal, JournalError, JournaledEvent};
use gridlink_core::{EventId, LinkName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const COUNTER_FILE: &str = "next_id";

/// JSON sidecar stored next to each payload file.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    created_at_ms: u64,
    target_link: String,
}

#[derive(Debug)]
struct IndexEntry {
    link: LinkName,
    created_at: Duration,
    bytes: u64,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    max_bytes: u64,
    next_id: u64,
    curr_bytes: u64,
    index: BTreeMap<u64, IndexEntry>,
}

impl Inner {
    fn event_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.ev"))
    }

    fn meta_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.meta"))
    }

    /// Persist the id counter. Durable before the id is used.
    fn advance_counter(&self, next: u64) -> Result<(), JournalError> {
        let tmp = self.dir.join(format!("{COUNTER_FILE}.tmp"));
        write_sync(&tmp, format!("{next}\n").as_bytes())?;
        fs::rename(&tmp, self.dir.join(COUNTER_FILE))?;
        sync_dir(&self.dir)?;
        Ok(())
    }
}

/// Filesystem-backed [`Journal`].
#[derive(Debug)]
pub struct FileJournal {
    inner: Mutex<Inner>,
}

impl FileJournal {
    /// Open or create a journal in `dir`, rebuilding the index from disk.
    ///
    /// Unreadable counter or sidecar files are reported as
    /// [`JournalError::Corruption`], which callers treat as fatal to startup.
    pub fn open(dir: impl AsRef<Path>, max_bytes: u64) -> Result<Self, JournalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let counter_path = dir.join(COUNTER_FILE);
        let stored_next = if counter_path.exists() {
            fs::read_to_string(&counter_path)?
                .trim()
                .parse::<u64>()
                .map_err(|e| JournalError::Corruption(format!("unreadable id counter: {e}")))?
        } else {
            0
        };

        let mut index = BTreeMap::new();
        let mut curr_bytes = 0u64;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ev") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    JournalError::Corruption(format!("unexpected journal file: {}", path.display()))
                })?;
            let meta_bytes = fs::read(dir.join(format!("{id}.meta"))).map_err(|e| {
                JournalError::Corruption(format!("missing sidecar for event {id}: {e}"))
            })?;
            let sidecar: Sidecar = serde_json::from_slice(&meta_bytes).map_err(|e| {
                JournalError::Corruption(format!("unreadable sidecar for event {id}: {e}"))
            })?;
            let bytes = entry.metadata()?.len();
            curr_bytes += bytes;
            index.insert(
                id,
                IndexEntry {
                    link: LinkName::new(sidecar.target_link),
                    created_at: Duration::from_millis(sidecar.created_at_ms),
                    bytes,
                },
            );
        }

        // The counter is advanced before payload files are written, so ids on
        // disk are always below the stored value; the max() guards a journal
        // whose counter file was lost.
        let next_id = index
            .keys()
            .next_back()
            .map(|max| max + 1)
            .unwrap_or(0)
            .max(stored_next);

        debug!(
            dir = %dir.display(),
            pending = index.len(),
            next_id,
            "journal opened"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                dir,
                max_bytes,
                next_id,
                curr_bytes,
                index,
            }),
        })
    }
}

impl Journal for FileJournal {
    fn append(&self, link: &LinkName, payload: &[u8]) -> Result<EventId, JournalError> {
        let mut inner = self.inner.lock().unwrap();
        let needed = payload.len() as u64;
        if inner.curr_bytes.saturating_add(needed) > inner.max_bytes {
            return Err(JournalError::StorageFull {
                needed,
                remaining: inner.max_bytes.saturating_sub(inner.curr_bytes),
                max_bytes: inner.max_bytes,
            });
        }

        let id = inner.next_id;
        inner.advance_counter(id + 1)?;

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let sidecar = Sidecar {
            created_at_ms: created_at.as_millis() as u64,
            target_link: link.as_str().to_owned(),
        };
        let meta_bytes = serde_json::to_vec(&sidecar)
            .map_err(|e| JournalError::StorageIo(std::io::Error::other(e)))?;
        write_sync(&inner.meta_path(id), &meta_bytes)?;
        write_sync(&inner.event_path(id), payload)?;
        sync_dir(&inner.dir)?;

        inner.index.insert(
            id,
            IndexEntry {
                link: link.clone(),
                created_at,
                bytes: needed,
            },
        );
        inner.curr_bytes += needed;
        inner.next_id = id + 1;
        Ok(EventId(id))
    }

    fn load(&self, id: EventId) -> Result<Option<Vec<u8>>, JournalError> {
        let inner = self.inner.lock().unwrap();
        if !inner.index.contains_key(&id.0) {
            return Ok(None);
        }
        // An indexed event whose file cannot be read (including NotFound) is
        // an I/O fault to retry, never "absent" — absence is reserved for
        // ids the index does not know.
        Ok(Some(fs::read(inner.event_path(id.0))?))
    }

    fn remove(&self, id: EventId) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.index.remove(&id.0) else {
            return Ok(());
        };
        remove_existing(&inner.event_path(id.0))?;
        remove_existing(&inner.meta_path(id.0))?;
        sync_dir(&inner.dir)?;
        inner.curr_bytes = inner.curr_bytes.saturating_sub(entry.bytes);
        Ok(())
    }

    fn unacked(&self) -> Vec<JournaledEvent> {
        let inner = self.inner.lock().unwrap();
        inner
            .index
            .iter()
            .map(|(&id, entry)| JournaledEvent {
                event_id: EventId(id),
                link: entry.link.clone(),
                created_at: entry.created_at,
            })
            .collect()
    }

    fn contains(&self, id: EventId) -> bool {
        self.inner.lock().unwrap().index.contains_key(&id.0)
    }

    fn count_unacked(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }
}

fn write_sync(path: &Path, bytes: &[u8]) -> Result<(), JournalError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn sync_dir(dir: &Path) -> Result<(), JournalError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

fn remove_existing(path: &Path) -> Result<(), JournalError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "journal file already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(name: &str) -> LinkName {
        LinkName::new(name)
    }

    #[test]
    fn append_then_remove_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::open(dir.path(), 1024).unwrap();

        let id = journal.append(&link("up"), b"payload").unwrap();
        assert!(journal.contains(id));
        assert_eq!(journal.count_unacked(), 1);

        journal.remove(id).unwrap();
        assert!(!journal.contains(id));
        assert_eq!(journal.count_unacked(), 0);
        assert_eq!(journal.load(id).unwrap(), None);

        // Idempotent.
        journal.remove(id).unwrap();
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first;
        {
            let journal = FileJournal::open(dir.path(), 1024).unwrap();
            first = journal.append(&link("up"), b"one").unwrap();
            journal.append(&link("down"), b"two").unwrap();
        }

        let journal = FileJournal::open(dir.path(), 1024).unwrap();
        let unacked = journal.unacked();
        assert_eq!(unacked.len(), 2);
        assert_eq!(unacked[0].event_id, first);
        assert_eq!(unacked[0].link, link("up"));
        assert_eq!(journal.load(first).unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(journal.unacked_for(&link("down")).len(), 1);
    }

    #[test]
    fn ids_stay_monotonic_across_restart_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let journal = FileJournal::open(dir.path(), 1024).unwrap();
            let id = journal.append(&link("up"), b"one").unwrap();
            journal.remove(id).unwrap();
            id
        };

        let journal = FileJournal::open(dir.path(), 1024).unwrap();
        let second = journal.append(&link("up"), b"two").unwrap();
        assert!(second > first);
    }

    #[test]
    fn rejects_append_beyond_size_bound() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::open(dir.path(), 8).unwrap();
        journal.append(&link("up"), b"12345").unwrap();

        let err = journal.append(&link("up"), b"67890").unwrap_err();
        assert!(matches!(err, JournalError::StorageFull { .. }));
        // The first event was not evicted.
        assert_eq!(journal.count_unacked(), 1);
    }

    #[test]
    fn unreadable_counter_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COUNTER_FILE), b"not a number").unwrap();

        let err = FileJournal::open(dir.path(), 1024).unwrap_err();
        assert!(matches!(err, JournalError::Corruption(_)));
    }

    #[test]
    fn missing_sidecar_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("7.ev"), b"payload").unwrap();

        let err = FileJournal::open(dir.path(), 1024).unwrap_err();
        assert!(matches!(err, JournalError::Corruption(_)));
    }

    #[test]
    fn indexed_event_with_unreadable_file_is_an_io_fault() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::open(dir.path(), 1024).unwrap();
        let id = journal.append(&link("up"), b"payload").unwrap();

        std::fs::remove_file(dir.path().join(format!("{}.ev", id.0))).unwrap();

        let err = journal.load(id).unwrap_err();
        assert!(matches!(err, JournalError::StorageIo(_)));
        // The event is still pending; nothing treats the fault as an ack.
        assert!(journal.contains(id));
    }

    #[test]
    fn orphan_sidecar_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("3.meta"), b"{}").unwrap();

        let journal = FileJournal::open(dir.path(), 1024).unwrap();
        assert_eq!(journal.count_unacked(), 0);
    }
}
