//! The mesh node: originates, delivers, and relays framed messages.
//!
//! Flood forwarding with a TTL budget. Every inbound frame passes the
//! same gauntlet: decode, self-origin check, blocklist, dedup insert,
//! then local dispatch and relay. The dedup insert happens BEFORE any
//! dispatch or relay, so a message is surfaced and relayed at most once
//! no matter how many copies arrive.
//!
//! TTL and hop count are touched in exactly one place, the relay step.
//! Delivery never mutates a header.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::MeshConfig;
use crate::crypto::{
    decrypt_channel, decrypt_private, encrypt_channel, encrypt_private, ChannelEnvelope,
    KeyManager, PeerKeys, PrivateEnvelope,
};
use crate::dedup::DedupCache;
use crate::identity::DeviceIdentity;
use crate::mesh::events::{
    EventBus, InboundMessage, MeshEvent, MeshMetrics, MessageScope, MetricsSnapshot,
};
use crate::peer::{
    Blocklist, ConnectionId, PeerError, PeerEvent, PeerRecord, PeerRegistry,
};
use crate::store::StorageBackend;
use crate::transport::{EventReceiver, Transport, TransportEvent};
use crate::wire::{
    decode_frame, encode_frame, MessageHeader, MessageKind, SenderId,
};
use crate::MeshError;

/// Identity/key announcement payload (bincode, `PeerAnnouncement` kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub nickname: Option<String>,
    pub signing_public_key: [u8; 32],
    pub agreement_public_key: [u8; 32],
}

/// Payload of a `Private` frame. The wire header has no recipient
/// field; addressing lives here, inside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrivateFrame {
    recipient: SenderId,
    envelope: PrivateEnvelope,
}

/// Payload of a `Channel` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelFrame {
    channel: String,
    envelope: ChannelEnvelope,
}

#[derive(Clone)]
pub struct MeshNode {
    config: Arc<MeshConfig>,
    identity: Arc<DeviceIdentity>,
    keys: Arc<KeyManager>,
    registry: Arc<PeerRegistry>,
    dedup: Arc<DedupCache>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    metrics: Arc<MeshMetrics>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MeshNode {
    pub fn new(
        config: MeshConfig,
        identity: DeviceIdentity,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, MeshError> {
        crate::init_logging();
        let blocklist = Blocklist::open(backend)?;
        let registry = Arc::new(PeerRegistry::new(blocklist, config.max_connected_peers));
        let keys = Arc::new(KeyManager::with_rotation(
            &identity,
            config.session_max_age(),
            config.session_max_uses,
        ));
        let dedup = Arc::new(DedupCache::new(config.dedup_capacity, config.dedup_expiry()));
        let bus = EventBus::new(registry.event_sender());
        Ok(Self {
            config: Arc::new(config),
            identity: Arc::new(identity),
            keys,
            registry,
            dedup,
            transport,
            bus,
            metrics: MeshMetrics::new(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn sender_id(&self) -> SenderId {
        self.identity.sender_id()
    }

    pub fn nickname(&self) -> Option<String> {
        self.identity.nickname.clone()
    }

    // ---- event streams ----

    pub fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.bus.subscribe_messages()
    }

    pub fn subscribe_peers(&self) -> broadcast::Receiver<PeerEvent> {
        self.bus.subscribe_peers()
    }

    pub fn subscribe_ops(&self) -> broadcast::Receiver<MeshEvent> {
        self.bus.subscribe_ops()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.registry.all()
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    // ---- lifecycle ----

    /// Spawn the inbound loop and the maintenance sweeps. `events` is
    /// the receiver half handed out by the transport at construction.
    pub fn start(&self, mut events: EventReceiver) {
        let node = self.clone();
        let inbound = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                node.handle_transport_event(event).await;
            }
            debug!("transport event stream closed");
        });

        let dedup = Arc::clone(&self.dedup);
        let sweep_interval = self.config.dedup_sweep_interval();
        let dedup_sweep = tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            loop {
                tick.tick().await;
                let purged = dedup.purge_expired();
                if purged > 0 {
                    trace!(purged, "dedup sweep");
                }
            }
        });

        let registry = Arc::clone(&self.registry);
        let stale_after = self.config.peer_stale_after();
        let peer_interval = self.config.peer_sweep_interval();
        let peer_sweep = tokio::spawn(async move {
            let mut tick = tokio::time::interval(peer_interval);
            loop {
                tick.tick().await;
                registry.evict_stale(stale_after);
            }
        });

        let registry = Arc::clone(&self.registry);
        let timeout = self.config.connect_timeout();
        let connect_interval = self.config.connect_sweep_interval();
        let connect_sweep = tokio::spawn(async move {
            let mut tick = tokio::time::interval(connect_interval);
            loop {
                tick.tick().await;
                registry.expire_connecting(timeout);
            }
        });

        let bus = self.bus.clone();
        let mut key_events = self.keys.subscribe_key_events();
        let key_watch = tokio::spawn(async move {
            while let Some(sender) = key_events.recv().await {
                bus.op(MeshEvent::PeerKeysAvailable { sender });
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.extend([inbound, dedup_sweep, peer_sweep, connect_sweep, key_watch]);
        info!(sender = %self.sender_id(), "mesh node started");
    }

    /// Stop background tasks and tear down transport links.
    pub async fn stop(&self) -> Result<(), MeshError> {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        self.transport.shutdown().await?;
        info!(sender = %self.sender_id(), "mesh node stopped");
        Ok(())
    }

    /// Wipe all derived key material. Identity keys are untouched.
    pub fn panic_wipe_keys(&self) {
        self.keys.clear_all();
        warn!("derived key material wiped");
    }

    // ---- outbound ----

    /// Broadcast a plaintext message to the whole mesh.
    pub async fn send_public(&self, content: &[u8]) -> Result<i64, MeshError> {
        self.originate(MessageKind::Public, content.to_vec()).await
    }

    /// Send an end-to-end encrypted message to one peer. The frame still
    /// floods; only the recipient can open it.
    pub async fn send_private(
        &self,
        recipient: SenderId,
        content: &[u8],
    ) -> Result<i64, MeshError> {
        let envelope = encrypt_private(&self.keys, recipient, content)?;
        let payload = bincode::serialize(&PrivateFrame {
            recipient,
            envelope,
        })?;
        self.originate(MessageKind::Private, payload).await
    }

    /// Send to every holder of a channel's key.
    pub async fn send_channel(&self, channel: &str, content: &[u8]) -> Result<i64, MeshError> {
        let envelope = encrypt_channel(&self.keys, channel, content)?;
        let payload = bincode::serialize(&ChannelFrame {
            channel: channel.to_owned(),
            envelope,
        })?;
        self.originate(MessageKind::Channel, payload).await
    }

    /// Flood our identity and public keys.
    pub async fn announce(&self) -> Result<i64, MeshError> {
        let payload = self.announcement_payload()?;
        self.originate(MessageKind::PeerAnnouncement, payload).await
    }

    pub fn join_channel(&self, channel: &str, password: &str) {
        self.keys.join_channel(channel, password);
    }

    pub fn leave_channel(&self, channel: &str) {
        self.keys.leave_channel(channel);
    }

    pub fn joined_channels(&self) -> Vec<String> {
        self.keys.joined_channels()
    }

    /// Connect to a peer by its durable identity rather than a
    /// connection handle. The peer must be visible on some link.
    pub fn connect_peer(&self, sender: SenderId) -> Result<(), MeshError> {
        let connection = self
            .registry
            .connection_of(&sender)
            .ok_or(PeerError::PeerNotFound(sender))?;
        self.registry.begin_connect(connection)?;
        self.registry.mark_connected(connection)?;
        Ok(())
    }

    /// Disconnect from a peer by its durable identity. Its record stays
    /// so it may reconnect later.
    pub fn disconnect_peer(&self, sender: SenderId) -> Result<(), MeshError> {
        let connection = self
            .registry
            .connection_of(&sender)
            .ok_or(PeerError::PeerNotFound(sender))?;
        self.registry.begin_disconnect(connection)?;
        self.registry.mark_disconnected(connection)?;
        Ok(())
    }

    pub fn block(&self, sender: SenderId) -> Result<(), MeshError> {
        Ok(self.registry.block(sender)?)
    }

    pub fn unblock(&self, sender: SenderId) -> Result<(), MeshError> {
        Ok(self.registry.unblock(sender)?)
    }

    pub fn blocked(&self) -> Vec<SenderId> {
        self.registry.blocklist().list()
    }

    fn announcement_payload(&self) -> Result<Vec<u8>, MeshError> {
        Ok(bincode::serialize(&Announcement {
            nickname: self.identity.nickname.clone(),
            signing_public_key: self.identity.signing_public_key(),
            agreement_public_key: self.identity.agreement_public_key(),
        })?)
    }

    /// Stamp a fresh header and fan the frame out to every connected
    /// peer. Our own dedup cache learns the id first so a looped-back
    /// copy is dropped.
    async fn originate(&self, kind: MessageKind, payload: Vec<u8>) -> Result<i64, MeshError> {
        let header = MessageHeader::new(
            kind,
            self.config.default_ttl,
            self.sender_id(),
            payload.len() as u16,
        );
        let frame = encode_frame(&header, &payload)?;
        self.dedup.insert(header.sender_id, header.message_id);

        let fanout = self.fan_out(&frame, None);
        MeshMetrics::bump(&self.metrics.sent);
        self.bus.op(MeshEvent::MessageSent {
            message_id: header.message_id,
            fanout,
        });
        trace!(id = header.message_id, kind = header.kind, fanout, "message originated");
        Ok(header.message_id)
    }

    /// Hand a frame to every connected peer except `skip`. Each send is
    /// spawned so one slow or failing link cannot stall the others or
    /// the inbound loop; failures surface as `MeshEvent::SendFailed`.
    /// Returns the number of links attempted.
    fn fan_out(&self, frame: &[u8], skip: Option<ConnectionId>) -> usize {
        let mut fanout = 0;
        for (connection, sender) in self.registry.connected() {
            if Some(connection) == skip {
                continue;
            }
            let transport = Arc::clone(&self.transport);
            let bus = self.bus.clone();
            let metrics = Arc::clone(&self.metrics);
            let frame = frame.to_vec();
            tokio::spawn(async move {
                if let Err(e) = transport.send(connection, frame).await {
                    debug!(%connection, %sender, error = %e, "fan-out send failed");
                    MeshMetrics::bump(&metrics.send_failures);
                    bus.op(MeshEvent::SendFailed {
                        connection,
                        reason: e.to_string(),
                    });
                }
            });
            fanout += 1;
        }
        fanout
    }

    // ---- inbound ----

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::LinkUp { connection } => {
                self.registry.discovered(connection);
                // Introduce ourselves directly on the fresh link.
                if let Err(e) = self.send_direct_announce(connection).await {
                    debug!(%connection, error = %e, "announce on new link failed");
                }
            }
            TransportEvent::LinkDown { connection } => {
                self.registry.link_lost(connection);
            }
            TransportEvent::Frame { connection, data } => {
                self.handle_frame(connection, &data).await;
            }
            TransportEvent::Signal { connection, rssi } => {
                self.registry.update_signal(connection, rssi);
            }
        }
    }

    async fn send_direct_announce(&self, connection: ConnectionId) -> Result<(), MeshError> {
        let payload = self.announcement_payload()?;
        let header = MessageHeader::new(
            MessageKind::PeerAnnouncement,
            self.config.default_ttl,
            self.sender_id(),
            payload.len() as u16,
        );
        let frame = encode_frame(&header, &payload)?;
        self.dedup.insert(header.sender_id, header.message_id);
        self.transport.send(connection, frame).await?;
        Ok(())
    }

    async fn handle_frame(&self, connection: ConnectionId, data: &[u8]) {
        let (header, payload) = match decode_frame(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                MeshMetrics::bump(&self.metrics.malformed_frames);
                self.bus.op(MeshEvent::MalformedFrame {
                    reason: e.to_string(),
                });
                debug!(%connection, error = %e, "malformed frame dropped");
                return;
            }
        };

        self.registry.note_frame(connection, header.hop_count);

        // Our own flood coming back around.
        if header.sender_id == self.sender_id() {
            return;
        }

        if self.registry.is_blocked(&header.sender_id) {
            MeshMetrics::bump(&self.metrics.blocked_dropped);
            self.bus.op(MeshEvent::BlockedDropped {
                sender: header.sender_id,
            });
            return;
        }

        // Claim the id before dispatching or relaying. A duplicate that
        // races us loses here and does nothing.
        if !self.dedup.insert(header.sender_id, header.message_id) {
            MeshMetrics::bump(&self.metrics.duplicates_dropped);
            self.bus.op(MeshEvent::DuplicateDropped {
                sender: header.sender_id,
                message_id: header.message_id,
            });
            return;
        }

        MeshMetrics::bump(&self.metrics.received);
        self.dispatch(connection, &header, &payload).await;
        self.relay(connection, &header, &payload).await;
    }

    async fn dispatch(&self, connection: ConnectionId, header: &MessageHeader, payload: &[u8]) {
        match header.message_kind() {
            Some(MessageKind::Public) => {
                self.bus.message(InboundMessage {
                    sender: header.sender_id,
                    message_id: header.message_id,
                    scope: MessageScope::Public,
                    content: payload.to_vec(),
                    hops: header.hop_count,
                });
            }
            Some(MessageKind::Private) => self.dispatch_private(header, payload),
            Some(MessageKind::Channel) => self.dispatch_channel(header, payload),
            Some(MessageKind::PeerAnnouncement) => {
                self.dispatch_announcement(connection, header, payload).await;
            }
            Some(
                MessageKind::Acknowledgment
                | MessageKind::KeyExchange
                | MessageKind::StoreForward
                | MessageKind::RoutingUpdate,
            )
            | None => {
                // Not consumed locally; the relay step still runs.
                self.bus.op(MeshEvent::UnhandledKindRelayed { kind: header.kind });
            }
        }
    }

    fn dispatch_private(&self, header: &MessageHeader, payload: &[u8]) {
        let frame: PrivateFrame = match bincode::deserialize(payload) {
            Ok(f) => f,
            Err(e) => {
                MeshMetrics::bump(&self.metrics.malformed_frames);
                self.bus.op(MeshEvent::MalformedFrame {
                    reason: e.to_string(),
                });
                return;
            }
        };
        // Not addressed to us; relay-only.
        if frame.recipient != self.sender_id() {
            return;
        }
        match decrypt_private(&self.keys, header.sender_id, &frame.envelope) {
            Ok(content) => {
                self.bus.message(InboundMessage {
                    sender: header.sender_id,
                    message_id: header.message_id,
                    scope: MessageScope::Private,
                    content,
                    hops: header.hop_count,
                });
            }
            Err(e) => {
                MeshMetrics::bump(&self.metrics.decrypt_failures);
                self.bus.op(MeshEvent::DecryptFailed {
                    sender: header.sender_id,
                    reason: e.to_string(),
                });
                debug!(sender = %header.sender_id, error = %e, "private decrypt failed");
            }
        }
    }

    fn dispatch_channel(&self, header: &MessageHeader, payload: &[u8]) {
        let frame: ChannelFrame = match bincode::deserialize(payload) {
            Ok(f) => f,
            Err(e) => {
                MeshMetrics::bump(&self.metrics.malformed_frames);
                self.bus.op(MeshEvent::MalformedFrame {
                    reason: e.to_string(),
                });
                return;
            }
        };
        match decrypt_channel(&self.keys, &frame.channel, header.sender_id, &frame.envelope) {
            Ok(content) => {
                self.bus.message(InboundMessage {
                    sender: header.sender_id,
                    message_id: header.message_id,
                    scope: MessageScope::Channel(frame.channel),
                    content,
                    hops: header.hop_count,
                });
            }
            // Not joined is the common case for relayed channels; stay quiet.
            Err(crate::crypto::CryptoError::ChannelNotJoined(_)) => {}
            Err(e) => {
                MeshMetrics::bump(&self.metrics.decrypt_failures);
                self.bus.op(MeshEvent::DecryptFailed {
                    sender: header.sender_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn dispatch_announcement(
        &self,
        connection: ConnectionId,
        header: &MessageHeader,
        payload: &[u8],
    ) {
        let announcement: Announcement = match bincode::deserialize(payload) {
            Ok(a) => a,
            Err(e) => {
                MeshMetrics::bump(&self.metrics.malformed_frames);
                self.bus.op(MeshEvent::MalformedFrame {
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.keys.store_peer_keys(
            header.sender_id,
            PeerKeys {
                signing: announcement.signing_public_key,
                agreement: announcement.agreement_public_key,
            },
        );

        // Only a zero-hop announcement proves the sender is on the other
        // end of this connection. Relayed ones just feed the key map.
        if header.hop_count > 0 {
            return;
        }
        if let Err(e) =
            self.registry
                .record_announce(connection, header.sender_id, announcement.nickname)
        {
            debug!(%connection, error = %e, "announce binding failed");
            return;
        }
        self.try_connect(connection).await;
    }

    /// Auto-connect policy: a link with a known, unblocked identity gets
    /// connected while capacity lasts. At capacity the peer stays
    /// discovered and may connect later when a slot frees.
    async fn try_connect(&self, connection: ConnectionId) {
        if !self.registry.can_connect(connection) {
            return;
        }
        match self.registry.begin_connect(connection) {
            Ok(()) => {
                // The local transport has no handshake to wait for.
                if let Err(e) = self.registry.mark_connected(connection) {
                    debug!(%connection, error = %e, "connect completion failed");
                }
            }
            Err(PeerError::CapacityExceeded { limit }) => {
                debug!(%connection, limit, "connect deferred, at capacity");
            }
            Err(e) => debug!(%connection, error = %e, "connect refused"),
        }
    }

    /// Decrement the budget and pass the frame along. The single place
    /// TTL and hop count change.
    async fn relay(&self, origin: ConnectionId, header: &MessageHeader, payload: &[u8]) {
        let Some(forwarded) = header.forwarded() else {
            MeshMetrics::bump(&self.metrics.ttl_exhausted);
            self.bus.op(MeshEvent::TtlExhausted {
                sender: header.sender_id,
                message_id: header.message_id,
            });
            return;
        };
        let frame = match encode_frame(&forwarded, payload) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "relay re-encode failed");
                return;
            }
        };
        let fanout = self.fan_out(&frame, Some(origin));
        if fanout > 0 {
            self.registry.note_forwarded(origin);
            MeshMetrics::bump(&self.metrics.forwarded);
            self.bus.op(MeshEvent::MessageForwarded {
                message_id: header.message_id,
                fanout,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use crate::transport::LocalHub;

    use crate::transport::LocalEndpoint;

    fn node(hub: &Arc<LocalHub>) -> (MeshNode, EventReceiver, LocalEndpoint) {
        let (endpoint, events) = hub.join();
        let handle = endpoint.clone();
        let node = MeshNode::new(
            MeshConfig::default(),
            DeviceIdentity::generate(),
            Arc::new(endpoint),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap();
        (node, events, handle)
    }

    /// Two linked nodes with their event loops running.
    async fn linked_pair() -> (MeshNode, MeshNode, Arc<LocalHub>) {
        let hub = LocalHub::new();
        let (a, rx_a, ep_a) = node(&hub);
        let (b, rx_b, ep_b) = node(&hub);
        a.start(rx_a);
        b.start(rx_b);

        let mut peers_a = a.subscribe_peers();
        let mut peers_b = b.subscribe_peers();
        hub.link(&ep_a, &ep_b);

        // Wait until both sides report connected.
        for peers in [&mut peers_a, &mut peers_b] {
            loop {
                match peers.recv().await {
                    Ok(PeerEvent::Connected { .. }) => break,
                    Ok(_) => continue,
                    Err(e) => panic!("peer event stream closed: {e}"),
                }
            }
        }
        (a, b, hub)
    }

    #[tokio::test]
    async fn public_message_reaches_linked_peer() {
        let (a, b, _hub) = linked_pair().await;
        let mut inbox_b = b.subscribe_messages();

        let id = a.send_public(b"hello mesh").await.unwrap();
        let msg = inbox_b.recv().await.unwrap();
        assert_eq!(msg.message_id, id);
        assert_eq!(msg.sender, a.sender_id());
        assert_eq!(msg.scope, MessageScope::Public);
        assert_eq!(msg.content, b"hello mesh");
        assert_eq!(msg.hops, 0);
    }

    #[tokio::test]
    async fn private_message_decrypts_only_for_recipient() {
        let (a, b, _hub) = linked_pair().await;
        let mut inbox_b = b.subscribe_messages();

        a.send_private(b.sender_id(), b"secret").await.unwrap();
        let msg = inbox_b.recv().await.unwrap();
        assert_eq!(msg.scope, MessageScope::Private);
        assert_eq!(msg.content, b"secret");
    }

    #[tokio::test]
    async fn blocked_sender_is_silenced() {
        let (a, b, _hub) = linked_pair().await;
        let mut ops_b = b.subscribe_ops();

        b.block(a.sender_id()).unwrap();
        a.send_public(b"you cannot hear me").await.unwrap();

        loop {
            match ops_b.recv().await.unwrap() {
                MeshEvent::BlockedDropped { sender } => {
                    assert_eq!(sender, a.sender_id());
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(b.metrics().blocked_dropped, 1);
    }

    #[tokio::test]
    async fn failed_sends_surface_on_the_ops_stream() {
        let hub = LocalHub::new();
        let (a, _events, _ep) = node(&hub);
        let mut ops = a.subscribe_ops();

        // A connected peer whose connection the hub knows nothing
        // about, so every send to it fails.
        let ghost = ConnectionId::new();
        a.registry().discovered(ghost);
        a.registry()
            .record_announce(ghost, SenderId([7; 6]), None)
            .unwrap();
        a.registry().begin_connect(ghost).unwrap();
        a.registry().mark_connected(ghost).unwrap();

        a.send_public(b"into the void").await.unwrap();
        loop {
            match ops.recv().await.unwrap() {
                MeshEvent::SendFailed { connection, .. } => {
                    assert_eq!(connection, ghost);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn disconnect_and_reconnect_by_identity() {
        let (a, b, _hub) = linked_pair().await;

        a.disconnect_peer(b.sender_id()).unwrap();
        assert_eq!(a.registry().connected_count(), 0);

        a.connect_peer(b.sender_id()).unwrap();
        assert_eq!(a.registry().connected_count(), 1);

        assert!(a.connect_peer(SenderId([9; 6])).is_err());
    }

    #[tokio::test]
    async fn signal_reports_land_on_the_peer_record() {
        let hub = LocalHub::new();
        let (a, rx_a, ep_a) = node(&hub);
        let (b, rx_b, ep_b) = node(&hub);
        a.start(rx_a);
        b.start(rx_b);

        let mut peers_a = a.subscribe_peers();
        let (conn_a, _conn_b) = hub.link(&ep_a, &ep_b);
        loop {
            match peers_a.recv().await {
                Ok(PeerEvent::Connected { .. }) => break,
                Ok(_) => continue,
                Err(e) => panic!("peer event stream closed: {e}"),
            }
        }

        hub.report_signal(conn_a, -42);
        for _ in 0..50 {
            if a.registry().record(conn_a).and_then(|r| r.rssi) == Some(-42) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("signal reading never reached the registry");
    }

    #[tokio::test]
    async fn channel_message_requires_membership() {
        let (a, b, _hub) = linked_pair().await;
        a.join_channel("#ember", "pw");
        b.join_channel("#ember", "pw");
        let mut inbox_b = b.subscribe_messages();

        a.send_channel("#ember", b"channel hello").await.unwrap();
        let msg = inbox_b.recv().await.unwrap();
        assert_eq!(msg.scope, MessageScope::Channel("#ember".into()));
        assert_eq!(msg.content, b"channel hello");
    }
}
