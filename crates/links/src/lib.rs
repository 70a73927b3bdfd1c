//! Per-link communication supervision.
//!
//! Two synchronous state machines, driven by the dispatcher:
//!
//! - [`LinkMachine`]: the per-link communication FSM. Consumes transport
//!   events, ack signals, and timer ticks; decides whether communication is
//!   "active" in the application sense and emits the actions (connects,
//!   subscribes, timers, notifications) the dispatcher executes.
//! - [`AckEngine`]: tracks outstanding publications of journaled events,
//!   enforces the in-flight window, raises ack starvation to the FSM, and
//!   replays the backlog when a link returns to active.
//!
//! Both machines are deterministic and perform no I/O; time is injected via
//! `set_time` before each `handle` call, so they run identically under the
//! production clock and under a logical test clock.

mod acks;
mod machine;

pub use acks::{AckConfig, AckEngine, AckInput, AckOutput};
pub use machine::{LinkAction, LinkEvent, LinkMachine, LinkTimer};
