//! Core types for the gridlink communication runtime.
//!
//! This crate provides the shared vocabulary for the runtime:
//!
//! - [`Event`]: All possible work items on the dispatcher's ingress queue
//! - [`TransportEvent`]: The normalised event stream a transport adapter emits
//! - [`TimerId`]: Identification for single-fire, cancellable timers
//! - [`StateChange`]: Link communication-state notifications
//! - [`LinkConfig`] / [`CoreConfig`]: Configuration
//!
//! # Architecture
//!
//! The runtime is built on a simple event-driven model:
//!
//! ```text
//! Events → state machines → actions → dispatcher executes I/O
//! ```
//!
//! The state machines (in `gridlink-links`) are:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + event = same actions
//! - **Pure-ish**: Mutate self, but perform no I/O
//!
//! All I/O is performed by the dispatcher loop (in `gridlink-runtime`), which
//! delivers events, executes the resulting actions, and converts transport
//! and timer callbacks back into events on its single ingress queue.

mod config;
mod event;
mod ids;
mod parser;
mod state_change;
mod timer;

pub use config::{BackoffSchedule, CoreConfig, LinkConfig};
pub use event::{Event, EventSender, PeerMessageFn, StateChangeFn, TransportEvent};
pub use ids::{EventId, LinkName, PublishTicket};
pub use parser::{PeerMessage, PeerParser};
pub use state_change::{LinkStateName, StateChange, StateChangeReason};
pub use timer::TimerId;
