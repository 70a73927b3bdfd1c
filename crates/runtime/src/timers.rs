//! Tokio-backed timer manager for the production dispatcher.

use crate::TimerOp;
use gridlink_core::{Event, EventSender, TimerId};
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// Converts buffered [`TimerOp`]s into tokio sleep tasks that fire
/// [`Event::Timer`] into the dispatcher's ingress queue.
///
/// Timers are single-fire; setting an id that is already armed replaces the
/// earlier timer. A cancelled timer's task is aborted, though a firing
/// already in the queue may still be delivered — the state machines tolerate
/// stale timer events.
pub struct TimerManager {
    handle: tokio::runtime::Handle,
    events: EventSender,
    active: HashMap<TimerId, JoinHandle<()>>,
}

impl TimerManager {
    pub fn new(handle: tokio::runtime::Handle, events: EventSender) -> Self {
        Self {
            handle,
            events,
            active: HashMap::new(),
        }
    }

    pub fn process(&mut self, op: TimerOp) {
        match op {
            TimerOp::Set { id, duration } => {
                if let Some(existing) = self.active.remove(&id) {
                    existing.abort();
                }
                let events = self.events.clone();
                let timer_id = id.clone();
                let task = self.handle.spawn(async move {
                    tokio::time::sleep(duration).await;
                    events.send(Event::Timer(timer_id));
                });
                self.active.insert(id, task);
            }
            TimerOp::Cancel { id } => {
                if let Some(existing) = self.active.remove(&id) {
                    existing.abort();
                }
            }
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        for (_, task) in self.active.drain() {
            task.abort();
        }
    }
}
