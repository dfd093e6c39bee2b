//! Peer registry: one record per transport connection, a sender-id
//! lookup table, and the lifecycle state machine.
//!
//! All tables live under a single `RwLock` so a state check and the
//! transition it guards are atomic. Lifecycle events are published on a
//! broadcast channel; a full receiver drops events for that subscriber
//! only, never blocks the registry.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::peer::{Blocklist, PeerError};
use crate::wire::SenderId;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Transport-level handle for one link. Minted by the transport when a
/// neighbor appears; meaningless after the link goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.0.as_simple().to_string()[..8];
        write!(f, "{short}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Discovered,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::Discovered => "discovered",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnecting => "disconnecting",
            PeerState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub connection: ConnectionId,
    /// Known once the peer announces itself; None for bare discoveries.
    pub sender: Option<SenderId>,
    pub nickname: Option<String>,
    pub state: PeerState,
    /// Signal strength reported by the transport, refreshed on every
    /// sighting. None until the transport reports one.
    pub rssi: Option<i16>,
    /// Hop distance of the last frame that arrived on this connection.
    pub hop_count: Option<u8>,
    /// When we last relayed a frame that came in on this connection.
    pub last_forward_at: Option<Instant>,
    pub last_seen: Instant,
    pub connected_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Discovered { connection: ConnectionId },
    Announced { connection: ConnectionId, sender: SenderId },
    Connected { connection: ConnectionId, sender: SenderId },
    Disconnected { connection: ConnectionId, sender: Option<SenderId> },
    Blocked { sender: SenderId },
    Unblocked { sender: SenderId },
    Evicted { connection: ConnectionId },
}

pub struct PeerRegistry {
    inner: RwLock<Tables>,
    blocklist: Blocklist,
    max_connected: usize,
    events: broadcast::Sender<PeerEvent>,
}

struct Tables {
    peers: HashMap<ConnectionId, PeerRecord>,
    by_sender: HashMap<SenderId, ConnectionId>,
}

impl PeerRegistry {
    pub fn new(blocklist: Blocklist, max_connected: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Tables {
                peers: HashMap::new(),
                by_sender: HashMap::new(),
            }),
            blocklist,
            max_connected,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Handle for sharing the lifecycle stream with an event bus.
    pub fn event_sender(&self) -> broadcast::Sender<PeerEvent> {
        self.events.clone()
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    // ---- discovery and identity ----

    /// Register a freshly visible link. Idempotent per connection.
    pub fn discovered(&self, connection: ConnectionId) {
        let mut inner = self.inner.write();
        if inner.peers.contains_key(&connection) {
            return;
        }
        inner.peers.insert(
            connection,
            PeerRecord {
                connection,
                sender: None,
                nickname: None,
                state: PeerState::Discovered,
                rssi: None,
                hop_count: None,
                last_forward_at: None,
                last_seen: Instant::now(),
                connected_at: None,
            },
        );
        drop(inner);
        debug!(%connection, "peer discovered");
        let _ = self.events.send(PeerEvent::Discovered { connection });
    }

    /// Bind the sender identity announced on a connection. A sender that
    /// reappears on a new connection steals the binding from the old one.
    pub fn record_announce(
        &self,
        connection: ConnectionId,
        sender: SenderId,
        nickname: Option<String>,
    ) -> Result<(), PeerError> {
        let mut inner = self.inner.write();
        if !inner.peers.contains_key(&connection) {
            return Err(PeerError::UnknownConnection(connection));
        }
        if let Some(previous) = inner.by_sender.insert(sender, connection) {
            if previous != connection {
                if let Some(old) = inner.peers.get_mut(&previous) {
                    old.sender = None;
                }
            }
        }
        let record = inner
            .peers
            .get_mut(&connection)
            .ok_or(PeerError::UnknownConnection(connection))?;
        record.sender = Some(sender);
        record.nickname = nickname;
        record.last_seen = Instant::now();
        drop(inner);
        let _ = self.events.send(PeerEvent::Announced { connection, sender });
        Ok(())
    }

    /// Record a frame sighting: liveness plus the hop distance the
    /// frame arrived with.
    pub fn note_frame(&self, connection: ConnectionId, hop_count: u8) {
        if let Some(record) = self.inner.write().peers.get_mut(&connection) {
            record.hop_count = Some(hop_count);
            record.last_seen = Instant::now();
        }
    }

    /// Record that a frame arriving on this connection was relayed on.
    pub fn note_forwarded(&self, connection: ConnectionId) {
        if let Some(record) = self.inner.write().peers.get_mut(&connection) {
            record.last_forward_at = Some(Instant::now());
        }
    }

    /// Record a signal-strength reading from the transport. Counts as a
    /// sighting for liveness purposes.
    pub fn update_signal(&self, connection: ConnectionId, rssi: i16) {
        if let Some(record) = self.inner.write().peers.get_mut(&connection) {
            record.rssi = Some(rssi);
            record.last_seen = Instant::now();
        }
    }

    // ---- lifecycle transitions ----

    /// Whether a connect attempt is currently allowed for this connection.
    pub fn can_connect(&self, connection: ConnectionId) -> bool {
        let inner = self.inner.read();
        let Some(record) = inner.peers.get(&connection) else {
            return false;
        };
        let Some(sender) = record.sender else {
            return false;
        };
        if self.blocklist.contains(&sender) {
            return false;
        }
        matches!(
            record.state,
            PeerState::Discovered | PeerState::Disconnected
        )
    }

    /// Start connecting. Fails fast when the cap is reached rather than
    /// queueing the attempt.
    pub fn begin_connect(&self, connection: ConnectionId) -> Result<(), PeerError> {
        let mut inner = self.inner.write();
        let active = inner
            .peers
            .values()
            .filter(|p| matches!(p.state, PeerState::Connecting | PeerState::Connected))
            .count();

        let record = inner
            .peers
            .get_mut(&connection)
            .ok_or(PeerError::UnknownConnection(connection))?;
        let sender = record.sender.ok_or(PeerError::IdentityUnknown(connection))?;
        if self.blocklist.contains(&sender) {
            return Err(PeerError::Blocked(sender));
        }
        if !matches!(
            record.state,
            PeerState::Discovered | PeerState::Disconnected
        ) {
            return Err(PeerError::InvalidTransition {
                from: record.state,
                to: PeerState::Connecting,
            });
        }
        if active >= self.max_connected {
            warn!(%connection, limit = self.max_connected, "connect refused, at capacity");
            return Err(PeerError::CapacityExceeded {
                limit: self.max_connected,
            });
        }
        record.state = PeerState::Connecting;
        record.last_seen = Instant::now();
        Ok(())
    }

    pub fn mark_connected(&self, connection: ConnectionId) -> Result<(), PeerError> {
        let mut inner = self.inner.write();
        let record = inner
            .peers
            .get_mut(&connection)
            .ok_or(PeerError::UnknownConnection(connection))?;
        if record.state != PeerState::Connecting {
            return Err(PeerError::InvalidTransition {
                from: record.state,
                to: PeerState::Connected,
            });
        }
        let sender = record.sender.ok_or(PeerError::IdentityUnknown(connection))?;
        record.state = PeerState::Connected;
        record.connected_at = Some(Instant::now());
        record.last_seen = Instant::now();
        drop(inner);
        info!(%connection, %sender, "peer connected");
        let _ = self.events.send(PeerEvent::Connected { connection, sender });
        Ok(())
    }

    pub fn begin_disconnect(&self, connection: ConnectionId) -> Result<(), PeerError> {
        let mut inner = self.inner.write();
        let record = inner
            .peers
            .get_mut(&connection)
            .ok_or(PeerError::UnknownConnection(connection))?;
        if !matches!(record.state, PeerState::Connecting | PeerState::Connected) {
            return Err(PeerError::InvalidTransition {
                from: record.state,
                to: PeerState::Disconnecting,
            });
        }
        record.state = PeerState::Disconnecting;
        Ok(())
    }

    /// Terminal for this connection attempt; the record stays so the
    /// peer may reconnect later.
    pub fn mark_disconnected(&self, connection: ConnectionId) -> Result<(), PeerError> {
        let mut inner = self.inner.write();
        let record = inner
            .peers
            .get_mut(&connection)
            .ok_or(PeerError::UnknownConnection(connection))?;
        if !matches!(
            record.state,
            PeerState::Connecting | PeerState::Connected | PeerState::Disconnecting
        ) {
            return Err(PeerError::InvalidTransition {
                from: record.state,
                to: PeerState::Disconnected,
            });
        }
        let sender = record.sender;
        record.state = PeerState::Disconnected;
        record.connected_at = None;
        drop(inner);
        info!(%connection, "peer disconnected");
        let _ = self
            .events
            .send(PeerEvent::Disconnected { connection, sender });
        Ok(())
    }

    /// The link itself went away. Removes the record entirely.
    pub fn link_lost(&self, connection: ConnectionId) {
        let mut inner = self.inner.write();
        let Some(record) = inner.peers.remove(&connection) else {
            return;
        };
        if let Some(sender) = record.sender {
            if inner.by_sender.get(&sender) == Some(&connection) {
                inner.by_sender.remove(&sender);
            }
        }
        drop(inner);
        debug!(%connection, "link lost");
        let _ = self.events.send(PeerEvent::Disconnected {
            connection,
            sender: record.sender,
        });
    }

    // ---- blocking ----

    /// Block a sender and force-disconnect it if currently active.
    pub fn block(&self, sender: SenderId) -> Result<(), PeerError> {
        self.blocklist.block(sender)?;
        let connection = {
            let inner = self.inner.read();
            inner.by_sender.get(&sender).copied().filter(|c| {
                inner
                    .peers
                    .get(c)
                    .map(|p| matches!(p.state, PeerState::Connecting | PeerState::Connected))
                    .unwrap_or(false)
            })
        };
        if let Some(connection) = connection {
            self.begin_disconnect(connection)?;
            self.mark_disconnected(connection)?;
        }
        info!(%sender, "peer blocked");
        let _ = self.events.send(PeerEvent::Blocked { sender });
        Ok(())
    }

    pub fn unblock(&self, sender: SenderId) -> Result<(), PeerError> {
        if self.blocklist.unblock(&sender)? {
            info!(%sender, "peer unblocked");
            let _ = self.events.send(PeerEvent::Unblocked { sender });
        }
        Ok(())
    }

    pub fn is_blocked(&self, sender: &SenderId) -> bool {
        self.blocklist.contains(sender)
    }

    // ---- queries ----

    pub fn record(&self, connection: ConnectionId) -> Option<PeerRecord> {
        self.inner.read().peers.get(&connection).cloned()
    }

    pub fn lookup_sender(&self, sender: &SenderId) -> Option<PeerRecord> {
        let inner = self.inner.read();
        let connection = inner.by_sender.get(sender)?;
        inner.peers.get(connection).cloned()
    }

    pub fn connection_of(&self, sender: &SenderId) -> Option<ConnectionId> {
        self.inner.read().by_sender.get(sender).copied()
    }

    /// Connections eligible as relay targets.
    pub fn connected(&self) -> Vec<(ConnectionId, SenderId)> {
        self.inner
            .read()
            .peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .filter_map(|p| p.sender.map(|s| (p.connection, s)))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.inner
            .read()
            .peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }

    pub fn all(&self) -> Vec<PeerRecord> {
        self.inner.read().peers.values().cloned().collect()
    }

    // ---- maintenance sweeps ----

    /// Drop records that have sat idle in a non-active state.
    pub fn evict_stale(&self, max_idle: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.write();
            let stale: Vec<ConnectionId> = inner
                .peers
                .values()
                .filter(|p| {
                    matches!(p.state, PeerState::Discovered | PeerState::Disconnected)
                        && now.duration_since(p.last_seen) >= max_idle
                })
                .map(|p| p.connection)
                .collect();
            for connection in stale {
                if let Some(record) = inner.peers.remove(&connection) {
                    if let Some(sender) = record.sender {
                        if inner.by_sender.get(&sender) == Some(&connection) {
                            inner.by_sender.remove(&sender);
                        }
                    }
                    evicted.push(connection);
                }
            }
        }
        for &connection in &evicted {
            debug!(%connection, "stale peer evicted");
            let _ = self.events.send(PeerEvent::Evicted { connection });
        }
        evicted
    }

    /// Force connections stuck in `Connecting` back to `Disconnected`.
    pub fn expire_connecting(&self, timeout: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        let stuck: Vec<ConnectionId> = {
            let inner = self.inner.read();
            inner
                .peers
                .values()
                .filter(|p| {
                    p.state == PeerState::Connecting
                        && now.duration_since(p.last_seen) >= timeout
                })
                .map(|p| p.connection)
                .collect()
        };
        for &connection in &stuck {
            warn!(%connection, "connect attempt timed out");
            let _ = self.mark_disconnected(connection);
        }
        stuck
    }
}
