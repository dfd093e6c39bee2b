//! Multi-node flood forwarding over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use embermesh_core::mesh::MeshNode;
use embermesh_core::store::MemoryStorage;
use embermesh_core::transport::{EventReceiver, LocalEndpoint, LocalHub};
use embermesh_core::{DeviceIdentity, InboundMessage, MeshConfig, MessageScope, PeerEvent};
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn build_node(hub: &Arc<LocalHub>, ttl: u8) -> (MeshNode, EventReceiver, LocalEndpoint) {
    let (endpoint, events) = hub.join();
    let handle = endpoint.clone();
    let config = MeshConfig {
        default_ttl: ttl,
        ..MeshConfig::default()
    };
    let node = MeshNode::new(
        config,
        DeviceIdentity::generate(),
        Arc::new(endpoint),
        Arc::new(MemoryStorage::new()),
    )
    .expect("node construction");
    (node, events, handle)
}

async fn wait_for_connections(rx: &mut broadcast::Receiver<PeerEvent>, count: usize) {
    let mut seen = 0;
    while seen < count {
        let event = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for connections")
            .expect("peer stream closed");
        if matches!(event, PeerEvent::Connected { .. }) {
            seen += 1;
        }
    }
}

async fn expect_one_message(rx: &mut broadcast::Receiver<InboundMessage>) -> InboundMessage {
    let msg = timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("message stream closed");
    // And no second copy afterwards.
    assert!(
        timeout(QUIET, rx.recv()).await.is_err(),
        "message surfaced more than once"
    );
    msg
}

/// Line topology A-B-C-D with TTL 3: everyone surfaces the message
/// exactly once, the last hop receives a spent TTL and relays nothing.
#[tokio::test]
async fn ttl_bounded_flood_along_a_line() {
    let hub = LocalHub::new();
    let (a, rx, ep_a) = build_node(&hub, 3);
    a.start(rx);
    let (b, rx, ep_b) = build_node(&hub, 3);
    b.start(rx);
    let (c, rx, ep_c) = build_node(&hub, 3);
    c.start(rx);
    let (d, rx, ep_d) = build_node(&hub, 3);
    d.start(rx);

    let mut peers_a = a.subscribe_peers();
    let mut peers_b = b.subscribe_peers();
    let mut peers_c = c.subscribe_peers();
    let mut peers_d = d.subscribe_peers();

    hub.link(&ep_a, &ep_b);
    hub.link(&ep_b, &ep_c);
    hub.link(&ep_c, &ep_d);

    wait_for_connections(&mut peers_a, 1).await;
    wait_for_connections(&mut peers_b, 2).await;
    wait_for_connections(&mut peers_c, 2).await;
    wait_for_connections(&mut peers_d, 1).await;

    let mut inbox_a = a.subscribe_messages();
    let mut inbox_b = b.subscribe_messages();
    let mut inbox_c = c.subscribe_messages();
    let mut inbox_d = d.subscribe_messages();

    let id = a.send_public(b"ripple").await.expect("send");

    let msg_b = expect_one_message(&mut inbox_b).await;
    let msg_c = expect_one_message(&mut inbox_c).await;
    let msg_d = expect_one_message(&mut inbox_d).await;

    for msg in [&msg_b, &msg_c, &msg_d] {
        assert_eq!(msg.message_id, id);
        assert_eq!(msg.sender, a.sender_id());
        assert_eq!(msg.scope, MessageScope::Public);
        assert_eq!(msg.content, b"ripple");
    }
    assert_eq!(msg_b.hops, 0);
    assert_eq!(msg_c.hops, 1);
    assert_eq!(msg_d.hops, 2);

    // The origin never hears its own flood.
    assert!(timeout(QUIET, inbox_a.recv()).await.is_err());

    // D got TTL 1: nothing left to relay.
    assert_eq!(d.metrics().forwarded, 0);
    assert!(d.metrics().ttl_exhausted >= 1);
}

/// Diamond topology: D is reachable via B and via C. The duplicate
/// copy is absorbed by the dedup cache, not surfaced.
#[tokio::test]
async fn duplicate_copies_are_suppressed() {
    let hub = LocalHub::new();
    let (a, rx, ep_a) = build_node(&hub, 7);
    a.start(rx);
    let (b, rx, ep_b) = build_node(&hub, 7);
    b.start(rx);
    let (c, rx, ep_c) = build_node(&hub, 7);
    c.start(rx);
    let (d, rx, ep_d) = build_node(&hub, 7);
    d.start(rx);

    let mut peers_a = a.subscribe_peers();
    let mut peers_d = d.subscribe_peers();

    hub.link(&ep_a, &ep_b);
    hub.link(&ep_a, &ep_c);
    hub.link(&ep_b, &ep_d);
    hub.link(&ep_c, &ep_d);

    wait_for_connections(&mut peers_a, 2).await;
    wait_for_connections(&mut peers_d, 2).await;

    let mut inbox_d = d.subscribe_messages();
    let id = a.send_public(b"both ways").await.expect("send");

    let msg = expect_one_message(&mut inbox_d).await;
    assert_eq!(msg.message_id, id);
    assert!(d.metrics().duplicates_dropped >= 1);
}

/// Messages larger than one hop's worth of TTL never reach past the
/// budget: with TTL 1 nothing is relayed at all.
#[tokio::test]
async fn ttl_one_reaches_only_direct_neighbors() {
    let hub = LocalHub::new();
    let (a, rx, ep_a) = build_node(&hub, 1);
    a.start(rx);
    let (b, rx, ep_b) = build_node(&hub, 1);
    b.start(rx);
    let (c, rx, ep_c) = build_node(&hub, 1);
    c.start(rx);

    let mut peers_b = b.subscribe_peers();
    hub.link(&ep_a, &ep_b);
    hub.link(&ep_b, &ep_c);
    wait_for_connections(&mut peers_b, 2).await;

    let mut inbox_b = b.subscribe_messages();
    let mut inbox_c = c.subscribe_messages();

    a.send_public(b"one hop only").await.expect("send");
    expect_one_message(&mut inbox_b).await;
    assert!(
        timeout(QUIET, inbox_c.recv()).await.is_err(),
        "TTL 1 message must not be relayed"
    );
}

/// Stopping a node tears down its links; the mesh routes around nothing
/// because the line is cut.
#[tokio::test]
async fn stopped_node_stops_relaying() {
    let hub = LocalHub::new();
    let (a, rx, ep_a) = build_node(&hub, 7);
    a.start(rx);
    let (b, rx, ep_b) = build_node(&hub, 7);
    b.start(rx);
    let (c, rx, ep_c) = build_node(&hub, 7);
    c.start(rx);

    let mut peers_b = b.subscribe_peers();
    hub.link(&ep_a, &ep_b);
    hub.link(&ep_b, &ep_c);
    wait_for_connections(&mut peers_b, 2).await;

    let mut inbox_c = c.subscribe_messages();
    b.stop().await.expect("stop");

    a.send_public(b"into the void").await.expect("send");
    assert!(timeout(QUIET, inbox_c.recv()).await.is_err());
}
