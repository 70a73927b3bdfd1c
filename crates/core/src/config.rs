//! Runtime and per-link configuration.

use crate::LinkName;
use std::path::PathBuf;
use std::time::Duration;

/// Exponential reconnect backoff schedule.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
    /// Multiplier applied per failed attempt.
    pub multiplier: u32,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

impl BackoffSchedule {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt);
        let millis = (self.initial.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.max)
    }
}

/// Configuration of one link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Stable link name.
    pub name: LinkName,

    /// Topic patterns subscribed on connect. Must be non-empty.
    pub ingress_topics: Vec<String>,

    /// Topic on which locally generated events are published.
    pub egress_topic: String,

    /// How long a publication may go unacknowledged while the link is active
    /// before the link is demoted.
    pub ack_timeout: Duration,

    /// How long the peer may stay silent while the link is active before the
    /// link is demoted.
    pub peer_silence_timeout: Duration,

    /// Keepalive cadence on the send path. A ping is published when no
    /// outbound traffic happened within this interval.
    pub poll_interval: Duration,

    /// Reconnect backoff applied after failed connect attempts.
    pub reconnect_backoff: BackoffSchedule,
}

impl LinkConfig {
    pub fn new(
        name: impl Into<LinkName>,
        ingress_topics: impl IntoIterator<Item = impl Into<String>>,
        egress_topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ingress_topics: ingress_topics.into_iter().map(Into::into).collect(),
            egress_topic: egress_topic.into(),
            ack_timeout: Duration::from_secs(5),
            peer_silence_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            reconnect_backoff: BackoffSchedule::default(),
        }
    }

    /// Set the acknowledgement timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the peer silence timeout.
    pub fn with_peer_silence_timeout(mut self, timeout: Duration) -> Self {
        self.peer_silence_timeout = timeout;
        self
    }

    /// Set the keepalive poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the reconnect backoff schedule.
    pub fn with_reconnect_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

/// Configuration of the runtime core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory holding the event journal.
    pub journal_dir: PathBuf,

    /// Bound on journal size; appends beyond it fail with `StorageFull`.
    pub journal_max_bytes: u64,

    /// Maximum outstanding publications per link.
    pub max_in_flight: usize,

    /// How long `stop()` waits for the dispatcher to drain.
    pub stop_deadline: Duration,
}

impl CoreConfig {
    pub fn new(journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            journal_dir: journal_dir.into(),
            journal_max_bytes: 500 * 1024 * 1024,
            max_in_flight: 8,
            stop_deadline: Duration::from_secs(5),
        }
    }

    /// Set the journal size bound.
    pub fn with_journal_max_bytes(mut self, max_bytes: u64) -> Self {
        self.journal_max_bytes = max_bytes;
        self
    }

    /// Set the in-flight publication bound.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set the stop deadline.
    pub fn with_stop_deadline(mut self, deadline: Duration) -> Self {
        self.stop_deadline = deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let backoff = BackoffSchedule::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(5), Duration::from_secs(32));
        assert_eq!(backoff.delay(6), Duration::from_secs(60));
        assert_eq!(backoff.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn backoff_saturates_on_huge_attempts() {
        let backoff = BackoffSchedule::default();
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn link_config_defaults() {
        let config = LinkConfig::new("upstream", ["in/a", "in/b"], "out/x");
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
        assert_eq!(config.peer_silence_timeout, Duration::from_secs(60));
        assert_eq!(config.ingress_topics.len(), 2);
    }
}
