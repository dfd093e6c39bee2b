//! Event delivery and counters for the mesh engine.
//!
//! Three broadcast streams: surfaced messages, peer lifecycle, and
//! operational events. Slow subscribers lose their own backlog; the
//! engine never blocks on delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::peer::{ConnectionId, PeerEvent};
use crate::wire::SenderId;

const MESSAGE_CHANNEL_CAPACITY: usize = 256;
const OPS_CHANNEL_CAPACITY: usize = 512;

/// Where a surfaced message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageScope {
    Public,
    Private,
    Channel(String),
}

/// A message accepted for local delivery.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: SenderId,
    pub message_id: i64,
    pub scope: MessageScope,
    pub content: Vec<u8>,
    /// Hops the message travelled before reaching us.
    pub hops: u8,
}

/// Operational happenings, mostly for diagnostics and the CLI.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    MessageSent { message_id: i64, fanout: usize },
    MessageForwarded { message_id: i64, fanout: usize },
    SendFailed { connection: ConnectionId, reason: String },
    DuplicateDropped { sender: SenderId, message_id: i64 },
    TtlExhausted { sender: SenderId, message_id: i64 },
    BlockedDropped { sender: SenderId },
    DecryptFailed { sender: SenderId, reason: String },
    MalformedFrame { reason: String },
    UnhandledKindRelayed { kind: u8 },
    PeerKeysAvailable { sender: SenderId },
}

#[derive(Clone)]
pub struct EventBus {
    messages: broadcast::Sender<InboundMessage>,
    peers: broadcast::Sender<PeerEvent>,
    ops: broadcast::Sender<MeshEvent>,
}

impl EventBus {
    /// The peer stream is shared with the registry, which publishes
    /// lifecycle events directly on it.
    pub fn new(peers: broadcast::Sender<PeerEvent>) -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (ops, _) = broadcast::channel(OPS_CHANNEL_CAPACITY);
        Self {
            messages,
            peers,
            ops,
        }
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.messages.subscribe()
    }

    pub fn subscribe_peers(&self) -> broadcast::Receiver<PeerEvent> {
        self.peers.subscribe()
    }

    pub fn subscribe_ops(&self) -> broadcast::Receiver<MeshEvent> {
        self.ops.subscribe()
    }

    pub(crate) fn message(&self, message: InboundMessage) {
        let _ = self.messages.send(message);
    }

    pub(crate) fn op(&self, event: MeshEvent) {
        let _ = self.ops.send(event);
    }
}

/// Monotonic counters. Cheap to bump from any task.
#[derive(Default)]
pub struct MeshMetrics {
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub forwarded: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub ttl_exhausted: AtomicU64,
    pub blocked_dropped: AtomicU64,
    pub decrypt_failures: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub send_failures: AtomicU64,
}

impl MeshMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            ttl_exhausted: self.ttl_exhausted.load(Ordering::Relaxed),
            blocked_dropped: self.blocked_dropped.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub forwarded: u64,
    pub duplicates_dropped: u64,
    pub ttl_exhausted: u64,
    pub blocked_dropped: u64,
    pub decrypt_failures: u64,
    pub malformed_frames: u64,
    pub send_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_bumps() {
        let metrics = MeshMetrics::new();
        MeshMetrics::bump(&metrics.sent);
        MeshMetrics::bump(&metrics.sent);
        MeshMetrics::bump(&metrics.forwarded);
        let snap = metrics.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.forwarded, 1);
        assert_eq!(snap.received, 0);
    }

    #[tokio::test]
    async fn message_stream_fans_out_to_all_subscribers() {
        let (peers, _) = broadcast::channel(8);
        let bus = EventBus::new(peers);
        let mut a = bus.subscribe_messages();
        let mut b = bus.subscribe_messages();
        bus.message(InboundMessage {
            sender: SenderId([1; 6]),
            message_id: 42,
            scope: MessageScope::Public,
            content: b"hey".to_vec(),
            hops: 2,
        });
        assert_eq!(a.recv().await.unwrap().message_id, 42);
        assert_eq!(b.recv().await.unwrap().message_id, 42);
    }
}
