//! Journal error taxonomy.

use thiserror::Error;

/// Failures of the persistent event journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The configured size bound would be exceeded. The event is rejected;
    /// journaled events are never evicted to make room.
    #[error("journal full: {needed} bytes needed, {remaining} remaining of {max_bytes}")]
    StorageFull {
        needed: u64,
        remaining: u64,
        max_bytes: u64,
    },

    /// An underlying filesystem operation failed.
    #[error("journal I/O failure")]
    StorageIo(#[from] std::io::Error),

    /// Persisted state could not be understood on startup. Fatal to start.
    #[error("journal corrupted: {0}")]
    Corruption(String),
}
