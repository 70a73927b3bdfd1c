//! Threaded façade smoke tests: start → activate → send → ack → stop.

use gridlink_core::{CoreConfig, LinkConfig, LinkStateName, PeerMessage, PeerParser};
use gridlink_runtime::{BuildError, CoreBuilder, QueryError, SendError};
use gridlink_transport::{MemoryTransport, MemoryTransportDriver, TransportFactory, TransportOp};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct AcceptAll;

impl PeerParser for AcceptAll {
    fn parse_peer_message(&self, topic: &str, payload: &[u8]) -> Option<PeerMessage> {
        Some(PeerMessage {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        })
    }
}

/// Factory that parks the driver side in a shared slot for the test.
fn memory_factory(slot: Arc<Mutex<Option<MemoryTransportDriver>>>) -> TransportFactory {
    Box::new(move |ctx| {
        let (transport, driver) = MemoryTransport::pair(ctx.link.clone(), ctx.events.clone());
        *slot.lock().unwrap() = Some(driver);
        Box::new(transport)
    })
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Wait until the driver records an op matching `predicate`, returning it.
fn wait_for_op(
    driver: &MemoryTransportDriver,
    mut predicate: impl FnMut(&TransportOp) -> bool,
) -> TransportOp {
    let found: Arc<Mutex<Option<TransportOp>>> = Arc::new(Mutex::new(None));
    let probe = Arc::clone(&found);
    wait_for(move || {
        for op in driver.take_ops() {
            if predicate(&op) {
                *probe.lock().unwrap() = Some(op);
                return true;
            }
        }
        false
    });
    let op = found.lock().unwrap().take().unwrap();
    op
}

#[test]
fn end_to_end_over_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let slot = Arc::new(Mutex::new(None));

    let handle = CoreBuilder::new(CoreConfig::new(dir.path()))
        .link(
            LinkConfig::new("upstream", ["in/a"], "out/x")
                .with_ack_timeout(Duration::from_secs(30)),
            memory_factory(Arc::clone(&slot)),
            AcceptAll,
        )
        .start()
        .unwrap();

    let driver = slot.lock().unwrap().take().unwrap();

    // The dispatcher commands a connect on start.
    wait_for_op(&driver, |op| matches!(op, TransportOp::Connect));
    driver.connected();
    wait_for_op(&driver, |op| matches!(op, TransportOp::Subscribe(_)));
    driver.suback("in/a");
    driver.message("in/a", b"hello");
    wait_for(|| handle.link_state("upstream").unwrap() == LinkStateName::Active);

    // Reliable send: journaled, published, acked, removed.
    let event_id = handle.send_event("upstream", b"reading-1").unwrap();
    let op = wait_for_op(&driver, |op| matches!(op, TransportOp::Publish { .. }));
    let TransportOp::Publish { topic, payload, ticket } = op else {
        unreachable!()
    };
    assert_eq!(topic, "out/x");
    assert_eq!(payload, b"reading-1");

    let stats = handle.link_stats("upstream").unwrap();
    assert!(stats.unacked_backlog >= 1);

    driver.puback(ticket);
    wait_for(|| handle.link_stats("upstream").unwrap().unacked_backlog == 0);
    // First event journaled by this core.
    assert_eq!(event_id.0, 0);

    handle.stop().unwrap();
    assert!(matches!(handle.stop(), Err(QueryError::NotStarted)));
    assert!(matches!(
        handle.send_event("upstream", b"x"),
        Err(SendError::NotStarted)
    ));
}

#[test]
fn state_change_subscription_over_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let slot = Arc::new(Mutex::new(None));
    let seen: Arc<Mutex<Vec<(LinkStateName, LinkStateName)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let handle = CoreBuilder::new(CoreConfig::new(dir.path()))
        .link(
            LinkConfig::new("upstream", ["in/a"], "out/x"),
            memory_factory(Arc::clone(&slot)),
            AcceptAll,
        )
        .on_state_change(move |change| {
            sink.lock().unwrap().push((change.from, change.to));
        })
        .start()
        .unwrap();

    let driver = slot.lock().unwrap().take().unwrap();
    wait_for_op(&driver, |op| matches!(op, TransportOp::Connect));
    driver.connected();
    driver.suback("in/a");
    driver.message("in/a", b"hi");
    wait_for(|| handle.link_state("upstream").unwrap() == LinkStateName::Active);

    let transitions = seen.lock().unwrap().clone();
    assert_eq!(
        transitions,
        vec![
            (LinkStateName::NotStarted, LinkStateName::Connecting),
            (
                LinkStateName::Connecting,
                LinkStateName::AwaitingSetupAndPeer
            ),
            (
                LinkStateName::AwaitingSetupAndPeer,
                LinkStateName::AwaitingPeer
            ),
            (LinkStateName::AwaitingPeer, LinkStateName::Active),
        ]
    );

    handle.stop().unwrap();
}

#[test]
fn journal_survives_restart_and_replays() {
    let dir = tempfile::tempdir().unwrap();

    // First run: journal an event while the link never activates.
    {
        let slot = Arc::new(Mutex::new(None));
        let handle = CoreBuilder::new(CoreConfig::new(dir.path()))
            .link(
                LinkConfig::new("upstream", ["in/a"], "out/x"),
                memory_factory(Arc::clone(&slot)),
                AcceptAll,
            )
            .start()
            .unwrap();
        handle.send_event("upstream", b"persisted").unwrap();
        handle.stop().unwrap();
    }

    // Second run: the recovered backlog replays on activation.
    let slot = Arc::new(Mutex::new(None));
    let handle = CoreBuilder::new(CoreConfig::new(dir.path()))
        .link(
            LinkConfig::new("upstream", ["in/a"], "out/x")
                .with_ack_timeout(Duration::from_secs(30)),
            memory_factory(Arc::clone(&slot)),
            AcceptAll,
        )
        .start()
        .unwrap();
    wait_for(|| handle.link_stats("upstream").unwrap().unacked_backlog == 1);

    let driver = slot.lock().unwrap().take().unwrap();
    wait_for_op(&driver, |op| matches!(op, TransportOp::Connect));
    driver.connected();
    driver.suback("in/a");
    driver.message("in/a", b"hi");

    let op = wait_for_op(&driver, |op| matches!(op, TransportOp::Publish { .. }));
    let TransportOp::Publish { payload, ticket, .. } = op else {
        unreachable!()
    };
    assert_eq!(payload, b"persisted");
    driver.puback(ticket);
    wait_for(|| handle.link_stats("upstream").unwrap().unacked_backlog == 0);

    handle.stop().unwrap();
}

#[test]
fn configuration_errors_are_fatal_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let slot = Arc::new(Mutex::new(None));

    let result = CoreBuilder::new(CoreConfig::new(dir.path()))
        .link(
            LinkConfig::new("upstream", Vec::<String>::new(), "out/x"),
            memory_factory(slot),
            AcceptAll,
        )
        .start();
    assert!(matches!(result, Err(BuildError::Config(_))));
}

#[test]
fn unknown_link_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let slot = Arc::new(Mutex::new(None));

    let handle = CoreBuilder::new(CoreConfig::new(dir.path()))
        .link(
            LinkConfig::new("upstream", ["in/a"], "out/x"),
            memory_factory(slot),
            AcceptAll,
        )
        .start()
        .unwrap();

    assert!(matches!(
        handle.send_event("nope", b"x"),
        Err(SendError::UnknownLink(_))
    ));
    assert!(matches!(
        handle.link_state("nope"),
        Err(QueryError::UnknownLink(_))
    ));

    handle.stop().unwrap();
}
