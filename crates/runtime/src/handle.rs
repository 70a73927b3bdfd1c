//! Public façade: builder, handle, and the dispatcher thread.

use crate::{CoreLoop, LinkStats, TimerManager};
use gridlink_core::{
    CoreConfig, Event, EventId, EventSender, LinkConfig, LinkName, LinkStateName, PeerMessage,
    PeerParser, StateChange,
};
use gridlink_journal::{FileJournal, Journal, JournalError};
use gridlink_links::AckConfig;
use gridlink_transport::{TransportContext, TransportFactory};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Failures of [`CoreBuilder::start`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configuration cannot describe a working core.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The event journal could not be opened or recovered.
    #[error("event journal unavailable")]
    Storage(#[from] JournalError),

    /// The dispatcher thread or timer runtime could not be started.
    #[error("failed to start runtime")]
    Runtime(#[source] std::io::Error),
}

/// Failures of [`CoreHandle::send_event`].
#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown link: {0}")]
    UnknownLink(LinkName),

    #[error("core is not running")]
    NotStarted,

    /// The journal rejected the event; it was NOT accepted and will not be
    /// delivered.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Failures of façade queries and `stop`.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown link: {0}")]
    UnknownLink(LinkName),

    #[error("core is not running")]
    NotStarted,
}

type StateChangeSubscriber = Box<dyn Fn(&StateChange) + Send>;
type PeerMessageSubscriber = Box<dyn Fn(&LinkName, &PeerMessage) + Send>;

/// Configures and starts a runtime core.
pub struct CoreBuilder {
    config: CoreConfig,
    links: Vec<(LinkConfig, TransportFactory, Box<dyn PeerParser>)>,
    state_subscribers: Vec<StateChangeSubscriber>,
    message_subscribers: Vec<PeerMessageSubscriber>,
}

impl CoreBuilder {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            links: Vec::new(),
            state_subscribers: Vec::new(),
            message_subscribers: Vec::new(),
        }
    }

    /// Add a link with its transport factory and application message parser.
    pub fn link(
        mut self,
        config: LinkConfig,
        transport: TransportFactory,
        parser: impl PeerParser + 'static,
    ) -> Self {
        self.links.push((config, transport, Box::new(parser)));
        self
    }

    /// Register a state-change subscriber before start.
    pub fn on_state_change(mut self, cb: impl Fn(&StateChange) + Send + 'static) -> Self {
        self.state_subscribers.push(Box::new(cb));
        self
    }

    /// Register a subscriber for validated inbound peer messages.
    pub fn on_peer_message(
        mut self,
        cb: impl Fn(&LinkName, &PeerMessage) + Send + 'static,
    ) -> Self {
        self.message_subscribers.push(Box::new(cb));
        self
    }

    /// Validate configuration, recover the journal, spawn the dispatcher,
    /// and start every link.
    pub fn start(self) -> Result<CoreHandle, BuildError> {
        let mut names = HashSet::new();
        for (link, _, _) in &self.links {
            if !names.insert(link.name.clone()) {
                return Err(BuildError::Config(format!("duplicate link: {}", link.name)));
            }
            if link.ingress_topics.is_empty() {
                return Err(BuildError::Config(format!(
                    "link {} has no ingress topics",
                    link.name
                )));
            }
            if link.egress_topic.is_empty() {
                return Err(BuildError::Config(format!(
                    "link {} has no egress topic",
                    link.name
                )));
            }
        }

        let journal: Arc<dyn Journal> = Arc::new(FileJournal::open(
            &self.config.journal_dir,
            self.config.journal_max_bytes,
        )?);
        let recovered = journal.count_unacked();
        if recovered > 0 {
            info!(recovered, "journal holds unacked events from a prior run");
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("gridlink-io")
            .enable_all()
            .build()
            .map_err(BuildError::Runtime)?;

        let (tx, rx) = crossbeam::channel::unbounded();
        let events = EventSender::new(tx);

        let mut core = CoreLoop::new(
            Arc::clone(&journal),
            AckConfig {
                max_in_flight: self.config.max_in_flight,
                ..AckConfig::default()
            },
        );
        for (link_config, factory, parser) in self.links {
            let transport = factory(TransportContext {
                link: link_config.name.clone(),
                events: events.clone(),
                runtime: runtime.handle().clone(),
            });
            core.add_link(link_config, transport, parser);
        }
        for cb in self.state_subscribers {
            core.subscribe_state_changes(cb);
        }
        for cb in self.message_subscribers {
            core.subscribe_peer_messages(cb);
        }

        let link_names: HashSet<LinkName> = names;
        let snapshots = core.snapshots();
        let timer_manager = TimerManager::new(runtime.handle().clone(), events.clone());
        let (done_tx, done_rx) = crossbeam::channel::bounded(1);

        let join = std::thread::Builder::new()
            .name("gridlink-dispatch".into())
            .spawn(move || run_dispatch(core, rx, timer_manager, done_tx))
            .map_err(BuildError::Runtime)?;

        Ok(CoreHandle {
            events,
            journal,
            snapshots,
            link_names,
            stop_deadline: self.config.stop_deadline,
            running: AtomicBool::new(true),
            join: Mutex::new(Some(join)),
            done_rx,
            runtime: Mutex::new(Some(runtime)),
        })
    }
}

/// Thread-safe, non-blocking handle to a running core.
///
/// All operations enqueue work; nothing here waits on the dispatcher except
/// [`stop`](CoreHandle::stop), which is bounded by the configured deadline.
pub struct CoreHandle {
    events: EventSender,
    journal: Arc<dyn Journal>,
    snapshots: Arc<RwLock<HashMap<LinkName, LinkStats>>>,
    link_names: HashSet<LinkName>,
    stop_deadline: Duration,
    running: AtomicBool,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
    done_rx: crossbeam::channel::Receiver<()>,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
}

impl CoreHandle {
    /// Journal an event for reliable delivery on `link`.
    ///
    /// The append happens synchronously on the calling thread; on `Ok` the
    /// event is durable and will be delivered (and re-delivered) until the
    /// peer acks it. On `Err` the event was not accepted.
    pub fn send_event(
        &self,
        link: impl Into<LinkName>,
        payload: &[u8],
    ) -> Result<EventId, SendError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(SendError::NotStarted);
        }
        let link = link.into();
        if !self.link_names.contains(&link) {
            return Err(SendError::UnknownLink(link));
        }
        let event_id = self.journal.append(&link, payload)?;
        self.events.send(Event::EventJournaled { link, event_id });
        Ok(event_id)
    }

    /// Register a state-change subscriber.
    ///
    /// Callbacks run synchronously on the dispatcher thread in registration
    /// order and must not re-enter the façade other than through its
    /// thread-safe enqueue.
    pub fn subscribe_state_changes(
        &self,
        cb: impl Fn(&StateChange) + Send + 'static,
    ) -> Result<(), QueryError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(QueryError::NotStarted);
        }
        self.events.send(Event::SubscribeStateChanges(Box::new(cb)));
        Ok(())
    }

    /// Current communication state of a link.
    pub fn link_state(&self, link: impl Into<LinkName>) -> Result<LinkStateName, QueryError> {
        self.link_stats(link).map(|stats| stats.state)
    }

    /// Current stats snapshot of a link.
    pub fn link_stats(&self, link: impl Into<LinkName>) -> Result<LinkStats, QueryError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(QueryError::NotStarted);
        }
        let link = link.into();
        self.snapshots
            .read()
            .unwrap()
            .get(&link)
            .cloned()
            .ok_or(QueryError::UnknownLink(link))
    }

    /// Stop the core: all links transition to `Stopped`, timers are
    /// cancelled, transports disconnect, pending publishes are abandoned
    /// (their events remain journaled for the next start).
    ///
    /// The dispatcher drain and the graceful transport disconnect share one
    /// window: the configured stop deadline. When it elapses, termination is
    /// forced.
    pub fn stop(&self) -> Result<(), QueryError> {
        if self.running.swap(false, Ordering::AcqRel) {
            let deadline = Instant::now() + self.stop_deadline;
            self.events.send(Event::Shutdown);
            match self.done_rx.recv_timeout(self.stop_deadline) {
                Ok(()) => {
                    if let Some(join) = self.join.lock().unwrap().take() {
                        let _ = join.join();
                    }
                }
                Err(_) => warn!("dispatcher did not drain within the stop deadline"),
            }
            if let Some(runtime) = self.runtime.lock().unwrap().take() {
                // Adapter tasks use the remaining window to finish their
                // graceful broker disconnects.
                runtime.shutdown_timeout(deadline.saturating_duration_since(Instant::now()));
            }
            Ok(())
        } else {
            Err(QueryError::NotStarted)
        }
    }
}

impl Drop for CoreHandle {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.events.send(Event::Shutdown);
        }
    }
}

/// Wall-clock time as a duration since the UNIX epoch.
fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
}

fn run_dispatch(
    mut core: CoreLoop,
    rx: crossbeam::channel::Receiver<Event>,
    mut timers: TimerManager,
    done: crossbeam::channel::Sender<()>,
) {
    info!("dispatcher starting");
    core.set_time(wall_clock());
    let output = core.start_links();
    for op in output.timer_ops {
        timers.process(op);
    }

    loop {
        let Ok(event) = rx.recv() else {
            break;
        };
        core.set_time(wall_clock());
        let output = core.step(event);
        for op in output.timer_ops {
            timers.process(op);
        }
        if output.shutdown {
            break;
        }
    }

    info!("dispatcher stopped");
    let _ = done.send(());
}
