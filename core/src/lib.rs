// Embermesh Core — flood-routed encrypted mesh messaging
//
// A node frames messages into a fixed 20-byte binary header, floods
// them across whatever links the transport surfaces, and relies on a
// dedup cache plus a TTL budget to keep the flood finite. Private and
// channel traffic is end-to-end encrypted; relays never see plaintext.

pub mod config;
pub mod crypto;
pub mod dedup;
pub mod identity;
pub mod mesh;
pub mod peer;
pub mod store;
pub mod transport;
pub mod wire;

use thiserror::Error;

pub use config::MeshConfig;
pub use crypto::CryptoError;
pub use dedup::DedupCache;
pub use identity::{DeviceIdentity, IdentityManager};
pub use mesh::{
    InboundMessage, MeshEvent, MeshNode, MessageScope, MetricsSnapshot,
};
pub use peer::{ConnectionId, PeerError, PeerEvent, PeerState};
pub use store::{MemoryStorage, SledStorage, StorageBackend, StoreError};
pub use transport::{Transport, TransportError, TransportEvent};
pub use wire::{MessageHeader, MessageKind, SenderId, WireError};

/// Umbrella error for the public API surface.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Identity error: {0}")]
    Identity(#[from] anyhow::Error),
}

/// Initialize tracing once. Honors `RUST_LOG`, defaults to `info`.
/// Safe to call repeatedly; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
