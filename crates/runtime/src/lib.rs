//! Dispatcher, timers, and public façade of the gridlink runtime.
//!
//! [`CoreLoop`] is the single-threaded cooperative dispatcher owning all
//! mutable core state: the per-link state machines, the ack engine, and the
//! journal handle. It is driven one event at a time via
//! [`CoreLoop::step`] — by the production loop on a dedicated thread, or by
//! a test harness with a logical clock.
//!
//! [`CoreBuilder`] / [`CoreHandle`] are the application-facing surface:
//! configure links, start, send events, observe state changes, query stats,
//! stop.

mod core_loop;
mod handle;
mod stats;
mod timers;

pub use core_loop::{CoreLoop, StepOutput, TimerOp};
pub use handle::{BuildError, CoreBuilder, CoreHandle, QueryError, SendError};
pub use stats::LinkStats;
pub use timers::TimerManager;

pub use gridlink_core::{
    BackoffSchedule, CoreConfig, Event, EventId, EventSender, LinkConfig, LinkName, LinkStateName,
    PeerMessage, PeerParser, PublishTicket, StateChange, StateChangeReason, TimerId,
};
