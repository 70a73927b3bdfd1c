//! Identifier newtypes shared across the runtime.

use serde::Serialize;
use std::fmt;

/// Stable name of a link to one external peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LinkName(String);

impl LinkName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LinkName {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for LinkName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for LinkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonically assigned identifier of a journaled event.
///
/// Unique within the process and persisted across restarts; peers dedupe
/// redelivered events by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-assigned correlation token for an outstanding publish.
///
/// Returned by `Transport::publish` and echoed back in
/// [`TransportEvent::PubAck`](crate::TransportEvent::PubAck) once the broker
/// acknowledges the publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublishTicket(pub u64);

impl fmt::Display for PublishTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
